use thiserror::Error;

/// Errors that can occur during contract execution.
///
/// The `Display` text of each variant is exactly the diagnostic the
/// interpreter surfaces on the evaluation stack, prefixed there with the
/// opcode name (or `vm.exec()` for top-level fetch and dispatch errors).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// An instruction or its immediates run past the end of the bytecode.
    #[error("Instruction set out of bounds")]
    CodeOutOfBounds,
    /// Bytecode exceeds the 100 000 byte limit.
    #[error("Instruction set to big")]
    CodeTooLarge,
    /// The fetched byte is not in the opcode catalog.
    #[error("Not a valid opCode")]
    InvalidOpCode,
    /// The gas budget cannot cover an opcode's base price.
    #[error("out of gas")]
    GasExhausted,
    /// The gas budget cannot cover a metered pop or the exponent surcharge.
    #[error("Out of gas")]
    OutOfGas,
    /// Pop from an empty evaluation stack.
    #[error("pop() on empty stack")]
    PopOnEmptyStack,
    /// Peek on an empty evaluation stack.
    #[error("peek on empty Stack")]
    PeekOnEmptyStack,
    /// A push would exceed the evaluation stack's memory bound.
    #[error("stack overflow / memory exceeded")]
    StackMemoryExceeded,
    /// Roll from a stack position that does not exist.
    #[error("index out of bounds")]
    InvalidStackIndex,
    /// Pop from an empty call stack.
    #[error("pop() on empty callStack")]
    PopOnEmptyCallStack,
    /// Peek on an empty call stack.
    #[error("peek() on empty callStack")]
    PeekOnEmptyCallStack,
    /// Division or modulo with a zero divisor.
    #[error("Division by Zero")]
    DivisionByZero,
    /// Exponentiation with a negative exponent.
    #[error("Negative exponents are not allowed.")]
    NegativeExponent,
    /// Index outside a container, the locals, the contract variables or the
    /// transaction data.
    #[error("Index out of bounds")]
    IndexOutOfBounds,
    /// `PushBool` immediate other than 0 or 1.
    #[error("invalid bool value {0}")]
    InvalidBool(u8),
    /// `PushChar` / `PushStr` byte outside the ASCII range.
    #[error("invalid ASCII code {0}")]
    InvalidAscii(u8),
    /// `Neg` applied to a value whose first byte is neither 0 nor 1.
    #[error("unable to negate {0}")]
    UnableToNegate(u8),
    /// `Neg` applied to an empty value.
    #[error("unable to negate empty value")]
    NegateEmpty,
    /// Signed integer decode on an empty byte sequence.
    #[error("not a valid signed integer")]
    EmptyInteger,
    /// A 2-byte field was not exactly 2 bytes.
    #[error("not a valid 16-bit value")]
    InvalidU16,
    /// An 8-byte field was not exactly 8 bytes.
    #[error("not a valid 64-bit value")]
    InvalidU64,
    /// Absolute value does not fit in 16 bits.
    #[error("value cannot be greater than 65535")]
    U16Overflow,
    /// Absolute value does not fit in 32 bits.
    #[error("value cannot be greater than 32bits")]
    U32Overflow,
    /// Array blob with a wrong tag, truncated length or inconsistent size.
    #[error("not a valid array")]
    NotAValidArray,
    /// Map blob with a wrong tag, truncated length or inconsistent size.
    #[error("not a valid map")]
    NotAValidMap,
    /// Struct blob that does not decode as an array.
    #[error("not a valid struct")]
    NotAValidStruct,
    /// Appended element cannot be represented in the array layout.
    #[error("Invalid argument size of ARRAPPEND")]
    InvalidAppendSize,
    /// Map lookup or removal of an absent key.
    #[error("key not found")]
    KeyNotFound,
    /// `Call` target outside `[1, len(code)]`.
    #[error("ReturnAddress out of bounds")]
    ReturnAddressOutOfBounds,
    /// `Ret` with a stack delta that disagrees with the declared count.
    #[error("Number of returned elements does not match.")]
    ReturnCountMismatch,
    /// `CheckSig` public key that is not 64 bytes.
    #[error("Not a valid address")]
    InvalidSignatureAddress,
    /// `CheckSig` message hash that is not 32 bytes.
    #[error("Not a valid hash")]
    InvalidSignatureHash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_stack_diagnostics() {
        assert_eq!(VmError::PopOnEmptyStack.to_string(), "pop() on empty stack");
        assert_eq!(VmError::PeekOnEmptyStack.to_string(), "peek on empty Stack");
        assert_eq!(
            VmError::PopOnEmptyCallStack.to_string(),
            "pop() on empty callStack"
        );
        assert_eq!(
            VmError::PeekOnEmptyCallStack.to_string(),
            "peek() on empty callStack"
        );
        assert_eq!(VmError::DivisionByZero.to_string(), "Division by Zero");
        assert_eq!(
            VmError::NegativeExponent.to_string(),
            "Negative exponents are not allowed."
        );
        assert_eq!(VmError::InvalidBool(5).to_string(), "invalid bool value 5");
        assert_eq!(VmError::InvalidAscii(200).to_string(), "invalid ASCII code 200");
        assert_eq!(VmError::UnableToNegate(2).to_string(), "unable to negate 2");
        assert_eq!(
            VmError::ReturnCountMismatch.to_string(),
            "Number of returned elements does not match."
        );
    }
}
