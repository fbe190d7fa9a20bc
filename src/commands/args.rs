//! Argument cursor used by the command parsers.

use crate::error::{EngineError, Result};
use crate::types::string::{parse_float, parse_int};
use bytes::Bytes;

/// Walks a command's arguments left to right.
#[derive(Debug)]
pub struct Args<'a> {
    command: &'a str,
    items: &'a [Bytes],
    pos: usize,
}

impl<'a> Args<'a> {
    pub fn new(command: &'a str, items: &'a [Bytes]) -> Self {
        Self {
            command,
            items,
            pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.items.len() - self.pos
    }

    /// Fails with an arity error unless there are exactly `n` arguments.
    pub fn exact(&self, n: usize) -> Result<()> {
        if self.items.len() == n {
            Ok(())
        } else {
            Err(EngineError::arity(self.command))
        }
    }

    pub fn at_least(&self, n: usize) -> Result<()> {
        if self.items.len() >= n {
            Ok(())
        } else {
            Err(EngineError::arity(self.command))
        }
    }

    pub fn bytes(&mut self) -> Result<Bytes> {
        let item = self
            .items
            .get(self.pos)
            .cloned()
            .ok_or_else(|| EngineError::arity(self.command))?;
        self.pos += 1;
        Ok(item)
    }

    pub fn int(&mut self) -> Result<i64> {
        parse_int(&self.bytes()?)
    }

    pub fn float(&mut self) -> Result<f64> {
        parse_float(&self.bytes()?)
    }

    /// A non-negative integer.
    pub fn count(&mut self) -> Result<usize> {
        let n = self.int()?;
        usize::try_from(n).map_err(|_| {
            EngineError::OutOfRange("value is out of range, must be positive".to_string())
        })
    }

    /// The next argument, upper-cased.
    pub fn keyword(&mut self) -> Result<Vec<u8>> {
        Ok(self.bytes()?.to_ascii_uppercase())
    }

    /// Consumes the next argument if it equals `keyword` (case-insensitive).
    pub fn eat(&mut self, keyword: &str) -> bool {
        match self.items.get(self.pos) {
            Some(item) if item.eq_ignore_ascii_case(keyword.as_bytes()) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    /// All remaining arguments.
    pub fn rest(&mut self) -> Vec<Bytes> {
        let rest = self.items[self.pos..].to_vec();
        self.pos = self.items.len();
        rest
    }

    /// Remaining arguments as pairs; fails on an odd count.
    pub fn pairs(&mut self) -> Result<Vec<(Bytes, Bytes)>> {
        if self.remaining() == 0 || self.remaining() % 2 != 0 {
            return Err(EngineError::arity(self.command));
        }
        let rest = self.rest();
        Ok(rest
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect())
    }

    /// Fails with a syntax error if anything is left over.
    pub fn finish(&self) -> Result<()> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(EngineError::syntax())
        }
    }
}
