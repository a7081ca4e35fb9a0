//! Turning instruction text into an executable [`Program`].
use std::{collections::HashMap, str::FromStr};

use lasso::{Rodeo, RodeoReader, Spur};

use crate::instruction::Opcode;

use super::{RuntimeError, RuntimeResult};

/// Splits instruction text into words.
///
/// Words are separated by whitespace. A word starting with `"` runs up to the
/// next unescaped `"`, whitespace included; the quotes are dropped and escapes
/// are kept as written.
pub fn tokenize(text: &str) -> RuntimeResult<Vec<&str>> {
    let mut words = vec![];
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        let (word, tail) = if let Some(quoted) = rest.strip_prefix('"') {
            let end = closing_quote(quoted).ok_or_else(|| {
                RuntimeError::MalformedProgram(Box::from("unterminated quoted operand"))
            })?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            rest.split_at(rest.find(char::is_whitespace).unwrap_or(rest.len()))
        };
        words.push(word);
        rest = tail.trim_start();
    }
    Ok(words)
}

fn closing_quote(text: &str) -> Option<usize> {
    let mut escaped = false;
    for (idx, c) in text.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(idx),
            _ => {}
        }
    }
    None
}

/// A loaded instruction stream.
///
/// `LABEL name` pairs are gone; each label maps to the address of the word
/// that followed it. Every word is interned, so the program is just a list of
/// symbols.
#[derive(Debug)]
pub struct Program {
    words: Vec<Spur>,
    labels: HashMap<Spur, usize>,
    interner: RodeoReader,
}

impl Program {
    pub fn load(text: &str) -> RuntimeResult<Self> {
        Self::from_words(tokenize(text)?)
    }

    /// Builds a program from words that are already split.
    ///
    /// A word right after an opcode that takes an operand is always that
    /// operand, even when it reads `LABEL`.
    pub fn from_words<'a>(words: impl IntoIterator<Item = &'a str>) -> RuntimeResult<Self> {
        let mut interner = Rodeo::default();
        let mut program = vec![];
        let mut labels = HashMap::new();
        let mut expects_operand = false;

        let mut words = words.into_iter();
        while let Some(word) = words.next() {
            if !expects_operand && word == Opcode::Label.mnemonic() {
                let name = words.next().ok_or_else(|| {
                    RuntimeError::MalformedProgram(Box::from("LABEL without a name"))
                })?;
                let name = interner.get_or_intern(name);
                if let Some(previous) = labels.insert(name, program.len()) {
                    tracing::warn!(
                        label = interner.resolve(&name),
                        previous,
                        address = program.len(),
                        "label defined more than once, the last definition wins"
                    );
                }
                continue;
            }
            expects_operand = !expects_operand
                && Opcode::from_str(word).is_ok_and(|opcode| opcode.operand_count() == 1);
            program.push(interner.get_or_intern(word));
        }

        if program.is_empty() {
            return Err(RuntimeError::MalformedProgram(Box::from(
                "program has no instructions",
            )));
        }
        tracing::debug!(
            words = program.len(),
            labels = labels.len(),
            "loaded program"
        );
        Ok(Self {
            words: program,
            labels,
            interner: interner.into_reader(),
        })
    }

    /// Number of words (opcodes and operands)
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn symbol(&self, address: usize) -> Option<Spur> {
        self.words.get(address).copied()
    }

    pub fn word(&self, address: usize) -> Option<&str> {
        self.symbol(address).map(|word| self.resolve(word))
    }

    pub fn resolve(&self, symbol: Spur) -> &str {
        self.interner.resolve(&symbol)
    }

    /// The symbol of a word, if the program contains it at all
    pub fn symbol_of(&self, word: &str) -> Option<Spur> {
        self.interner.get(word)
    }

    /// Where a label points to, by name
    pub fn label(&self, name: &str) -> Option<usize> {
        self.symbol_of(name)
            .and_then(|name| self.label_symbol(name))
    }

    pub fn label_symbol(&self, name: Spur) -> Option<usize> {
        self.labels.get(&name).copied()
    }

    /// Decodes the opcode stored at `address`.
    pub fn opcode(&self, address: usize) -> RuntimeResult<Opcode> {
        let word = self
            .word(address)
            .ok_or(RuntimeError::EndOfProgram { address })?;
        match Opcode::from_str(word) {
            Ok(Opcode::Label) | Err(_) => Err(RuntimeError::UnknownInstruction {
                address,
                text: Box::from(word),
            }),
            Ok(opcode) => Ok(opcode),
        }
    }

    /// Resolves the label operand of the jump at `address`.
    pub fn jump_target(&self, address: usize, label: Spur) -> RuntimeResult<usize> {
        let target = self
            .label_symbol(label)
            .ok_or_else(|| RuntimeError::InvalidLabel {
                address,
                label: Box::from(self.resolve(label)),
            })?;
        if target >= self.len() {
            return Err(RuntimeError::InvalidAddress { address, target });
        }
        Ok(target)
    }

    /// Checks every opcode and jump target without executing anything.
    ///
    /// Reports the first problem execution could run into when reaching it.
    pub fn verify_labels(&self) -> RuntimeResult<()> {
        let mut address = 0;
        while address < self.len() {
            let opcode = self.opcode(address)?;
            if opcode.operand_count() == 1 {
                let operand = self
                    .symbol(address + 1)
                    .ok_or(RuntimeError::MissingOperand { address, opcode })?;
                if opcode.takes_label() {
                    self.jump_target(address, operand)?;
                }
            }
            address += 1 + opcode.operand_count();
        }
        Ok(())
    }
}

impl FromStr for Program {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::load(s)
    }
}
