//! EVM stack implementation

use crate::error::{EvmError, EvmResult};
use crate::gas::cost::MAX_STACK_SIZE;
use bach_crypto::U256;

/// EVM stack (max 1024 items, 256-bit each).
///
/// The interpreter validates depth against `Opcode::stack_io` before
/// each step, so the accessors below only fail on internal misuse.
#[derive(Clone, Debug, Default)]
pub struct Stack {
    data: Vec<U256>,
}

impl Stack {
    /// Create a new empty stack
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(MAX_STACK_SIZE),
        }
    }

    /// Push a value onto the stack
    pub fn push(&mut self, value: U256) -> EvmResult<()> {
        if self.data.len() >= MAX_STACK_SIZE {
            return Err(EvmError::StackOverflow);
        }
        self.data.push(value);
        Ok(())
    }

    /// Pop a value from the stack
    pub fn pop(&mut self) -> EvmResult<U256> {
        self.data.pop().ok_or(EvmError::StackUnderflow { have: 0, want: 1 })
    }

    /// Value at `depth` below the top (0 = top)
    pub fn peek(&self, depth: usize) -> EvmResult<U256> {
        let len = self.data.len();
        if depth >= len {
            return Err(EvmError::StackUnderflow {
                have: len,
                want: depth + 1,
            });
        }
        Ok(self.data[len - 1 - depth])
    }

    /// Swap the top with the item `depth` below it
    pub fn swap(&mut self, depth: usize) -> EvmResult<()> {
        let len = self.data.len();
        if depth == 0 || depth >= len {
            return Err(EvmError::StackUnderflow {
                have: len,
                want: depth + 1,
            });
        }
        self.data.swap(len - 1, len - 1 - depth);
        Ok(())
    }

    /// Push a copy of the item at `depth` (1 = top)
    pub fn dup(&mut self, depth: usize) -> EvmResult<()> {
        let value = self.peek(depth.saturating_sub(1))?;
        self.push(value)
    }

    /// Check that `pops` items exist and `pushes` more fit afterwards
    pub fn require(&self, pops: usize, pushes: usize) -> EvmResult<()> {
        let len = self.data.len();
        if len < pops {
            return Err(EvmError::StackUnderflow { have: len, want: pops });
        }
        if len - pops + pushes > MAX_STACK_SIZE {
            return Err(EvmError::StackOverflow);
        }
        Ok(())
    }

    /// Current stack size
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if stack is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Items bottom first
    pub fn data(&self) -> &[U256] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut stack = Stack::new();
        stack.push(U256::from(1)).unwrap();
        stack.push(U256::from(2)).unwrap();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.pop().unwrap(), U256::from(2));
        assert_eq!(stack.pop().unwrap(), U256::from(1));
        assert!(stack.pop().is_err());
    }

    #[test]
    fn test_overflow() {
        let mut stack = Stack::new();
        for i in 0..MAX_STACK_SIZE {
            stack.push(U256::from(i)).unwrap();
        }
        assert_eq!(stack.push(U256::zero()), Err(EvmError::StackOverflow));
    }

    #[test]
    fn test_dup_swap() {
        let mut stack = Stack::new();
        stack.push(U256::from(1)).unwrap();
        stack.push(U256::from(2)).unwrap();
        stack.dup(2).unwrap();
        assert_eq!(stack.data(), &[U256::from(1), U256::from(2), U256::from(1)]);

        stack.swap(2).unwrap();
        assert_eq!(stack.data(), &[U256::from(1), U256::from(2), U256::from(1)]);
        stack.swap(1).unwrap();
        assert_eq!(stack.data(), &[U256::from(1), U256::from(1), U256::from(2)]);
    }

    #[test]
    fn test_require() {
        let mut stack = Stack::new();
        stack.push(U256::one()).unwrap();
        assert!(stack.require(1, 1).is_ok());
        assert_eq!(
            stack.require(2, 1),
            Err(EvmError::StackUnderflow { have: 1, want: 2 })
        );
    }
}
