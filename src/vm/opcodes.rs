//! Opcode catalog.
//!
//! The [`for_each_opcode!`] macro holds the canonical opcode definitions
//! (numeric code, mnemonic, immediate-argument kinds, base gas price and
//! per-word gas factor) and invokes a callback macro for code generation,
//! so the enum, the decoder and the accessors cannot drift apart.
//!
//! # Bytecode format
//!
//! Instructions are an opcode byte followed by their immediates:
//! - `Bytes`: one length byte `n`, then `n` payload bytes (`pushint`
//!   consumes `n + 1`, sign tag plus magnitude)
//! - `Byte`: one raw byte
//! - `Label`: 2-byte big-endian code offset (also carries the 2-byte size
//!   and field-index immediates of `newstr` / `storefld` / `loadfld`)
//! - `Addr`: fixed 32-byte account address

use crate::vm::errors::VmError;

/// Immediate-argument kinds an opcode can declare.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArgKind {
    /// One length byte followed by that many payload bytes.
    Bytes,
    /// One raw byte.
    Byte,
    /// Two-byte big-endian code offset.
    Label,
    /// Fixed 32-byte account address.
    Addr,
}

/// Invokes a callback macro with the complete opcode definition list.
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Stack manipulation
            // =========================
            /// pushint n, sign, bytes ; push a sign-tagged big integer
            PushInt = 0x00, "pushint" => [Bytes], 1, 1,
            /// pushbool b ; push a boolean byte (0 or 1)
            PushBool = 0x01, "pushbool" => [Byte], 1, 1,
            /// pushchar c ; push an ASCII character byte
            PushChar = 0x02, "pushchar" => [Byte], 1, 1,
            /// pushstr n, bytes ; push an ASCII string
            PushStr = 0x03, "pushstr" => [Bytes], 1, 1,
            /// push n, bytes ; push an opaque blob
            Push = 0x04, "push" => [Bytes], 1, 1,
            /// dup ; duplicate the top of the stack
            Dup = 0x05, "dup" => [], 1, 2,
            /// roll k ; move the element k+2 positions below the top to the top
            Roll = 0x06, "roll" => [Byte], 1, 2,
            /// swap ; exchange the two topmost elements
            Swap = 0x07, "swap" => [], 1, 2,
            /// pop ; discard the top of the stack
            Pop = 0x08, "pop" => [], 1, 1,
            // =========================
            // Arithmetic
            // =========================
            /// add ; signed big-integer addition
            Add = 0x09, "add" => [], 1, 2,
            /// sub ; signed big-integer subtraction
            Sub = 0x0A, "sub" => [], 1, 2,
            /// mult ; signed big-integer multiplication
            Mul = 0x0B, "mult" => [], 1, 2,
            /// div ; signed big-integer division (traps on zero divisor)
            Div = 0x0C, "div" => [], 1, 2,
            /// mod ; signed big-integer modulo (traps on zero divisor)
            Mod = 0x0D, "mod" => [], 1, 2,
            /// neg ; boolean negation of the first operand byte
            Neg = 0x0E, "neg" => [], 1, 2,
            /// exp ; exponentiation, metered per multiplication
            Exp = 0x0F, "exp" => [], 1, 2,
            // =========================
            // Comparison
            // =========================
            /// eq ; byte-wise equality
            Eq = 0x10, "eq" => [], 1, 2,
            /// neq ; byte-wise inequality
            NotEq = 0x11, "neq" => [], 1, 2,
            /// lt ; less than (char or big-integer compare)
            Lt = 0x12, "lt" => [], 1, 2,
            /// gt ; greater than
            Gt = 0x13, "gt" => [], 1, 2,
            /// lte ; less than or equal
            LtEq = 0x14, "lte" => [], 1, 2,
            /// gte ; greater than or equal
            GtEq = 0x15, "gte" => [], 1, 2,
            // =========================
            // Bitwise
            // =========================
            /// shiftl ; shift left by the popped count
            ShiftL = 0x16, "shiftl" => [], 1, 2,
            /// shiftr ; shift right by the popped count
            ShiftR = 0x17, "shiftr" => [], 1, 2,
            /// and ; bitwise and
            BitwiseAnd = 0x18, "and" => [], 1, 2,
            /// or ; bitwise or
            BitwiseOr = 0x19, "or" => [], 1, 2,
            /// xor ; bitwise xor
            BitwiseXor = 0x1A, "xor" => [], 1, 2,
            /// not ; bitwise complement
            BitwiseNot = 0x1B, "not" => [], 1, 2,
            // =========================
            // Control flow
            // =========================
            /// nop b ; consume and discard one immediate byte
            NoOp = 0x1C, "nop" => [Byte], 1, 1,
            /// jmp label ; unconditional jump
            Jmp = 0x1D, "jmp" => [Label], 1, 1,
            /// jmptrue label ; jump when the popped boolean is true
            JmpTrue = 0x1E, "jmptrue" => [Label], 1, 1,
            /// jmpfalse label ; jump when the popped boolean is false
            JmpFalse = 0x1F, "jmpfalse" => [Label], 1, 1,
            /// call label, nargs, nret ; push a frame and jump
            Call = 0x20, "call" => [Label, Byte, Byte], 1, 1,
            /// calltrue label, nargs, nret ; call when the popped boolean is true
            CallTrue = 0x21, "calltrue" => [Label, Byte, Byte], 1, 2,
            /// callext addr, hash, nargs ; invoke a function of another contract
            CallExt = 0x22, "callext" => [Addr, Byte, Byte, Byte, Byte, Byte], 1000, 2,
            /// ret ; pop the top frame and resume at its return address
            Ret = 0x23, "ret" => [], 1, 1,
            /// halt ; terminate successfully
            Halt = 0x24, "halt" => [], 0, 1,
            /// errhalt ; terminate with failure and no diagnostic
            ErrHalt = 0x25, "errhalt" => [], 0, 1,
            // =========================
            // Locals and contract variables
            // =========================
            /// size ; push the byte length of the popped value
            Size = 0x26, "size" => [], 1, 1,
            /// store i ; pop a value into local i of the top frame
            StoreLoc = 0x27, "store" => [Byte], 1, 2,
            /// sstore i ; pop a value into contract variable i
            StoreSt = 0x28, "sstore" => [Byte], 1000, 2,
            /// load i ; push local i of the top frame
            LoadLoc = 0x29, "load" => [Byte], 1, 2,
            /// sload i ; push contract variable i
            LoadSt = 0x2A, "sload" => [Byte], 10, 2,
            // =========================
            // Context
            // =========================
            /// address ; push the 64-byte account address
            Address = 0x2B, "address" => [], 1, 1,
            /// issuer ; push the 32-byte contract issuer
            Issuer = 0x2C, "issuer" => [], 1, 1,
            /// balance ; push the account balance, 8 bytes little-endian
            Balance = 0x2D, "balance" => [], 1, 1,
            /// caller ; push the 32-byte transaction sender
            Caller = 0x2E, "caller" => [], 1, 1,
            /// callval ; push the transacted amount, 8 bytes little-endian
            CallVal = 0x2F, "callval" => [], 1, 1,
            /// calldata ; push every length-prefixed transaction parameter
            CallData = 0x30, "calldata" => [], 1, 1,
            // =========================
            // Containers
            // =========================
            /// newmap ; push an empty map
            NewMap = 0x31, "newmap" => [], 1, 2,
            /// maphaskey ; push whether the popped map contains the popped key
            MapHasKey = 0x32, "maphaskey" => [], 1, 2,
            /// mapgetval ; push the value stored under the popped key
            MapGetVal = 0x33, "mapgetval" => [], 1, 2,
            /// mapsetval ; set (or append) the popped key/value pair
            MapSetVal = 0x34, "mapsetval" => [], 1, 2,
            /// mapremove ; remove the popped key
            MapRemove = 0x35, "mapremove" => [], 1, 2,
            /// newarr ; push an array of n zero-byte elements
            NewArr = 0x36, "newarr" => [], 1, 2,
            /// arrappend ; append the popped value
            ArrAppend = 0x37, "arrappend" => [], 1, 2,
            /// arrinsert ; write the popped value at the popped index
            ArrInsert = 0x38, "arrinsert" => [], 1, 2,
            /// arrremove ; remove the element at the popped index
            ArrRemove = 0x39, "arrremove" => [], 1, 2,
            /// arrat ; push the element at the popped index
            ArrAt = 0x3A, "arrat" => [], 1, 2,
            /// arrlen ; push the element count of the popped array
            ArrLen = 0x3B, "arrlen" => [], 1, 2,
            /// newstr size ; push a struct of size zero-initialized fields
            NewStr = 0x3C, "newstr" => [Label], 1, 2,
            /// storefld k ; write the popped value into field k of the popped struct
            StoreFld = 0x3D, "storefld" => [Label], 1, 2,
            /// loadfld k ; push field k of the popped struct
            LoadFld = 0x3E, "loadfld" => [Label], 1, 2,
            // =========================
            // Cryptographic
            // =========================
            /// sha3 ; push the SHA3-256 digest of the popped value
            Sha3 = 0x3F, "sha3" => [], 1, 2,
            /// checksig ; verify the context signature against key and hash
            CheckSig = 0x40, "checksig" => [], 1, 2,
        }
    };
}

macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $code:literal, $mnemonic:literal => [
                $( $kind:ident ),* $(,)?
            ], $price:expr, $factor:expr
        ),* $(,)?
    ) => {
        /// A single entry of the opcode catalog.
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum OpCode {
            $(
                $(#[$doc])*
                $name = $code,
            )*
        }

        impl TryFrom<u8> for OpCode {
            type Error = VmError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $code => Ok(OpCode::$name), )*
                    _ => Err(VmError::InvalidOpCode),
                }
            }
        }

        impl OpCode {
            /// Returns the mnemonic used in stack diagnostics.
            pub const fn name(&self) -> &'static str {
                match self {
                    $( OpCode::$name => $mnemonic, )*
                }
            }

            /// Returns the immediate-argument kinds, in wire order.
            pub const fn arg_kinds(&self) -> &'static [ArgKind] {
                match self {
                    $( OpCode::$name => &[ $( ArgKind::$kind ),* ], )*
                }
            }

            /// Returns the base gas price charged on dispatch.
            pub const fn gas_price(&self) -> u64 {
                match self {
                    $( OpCode::$name => $price, )*
                }
            }

            /// Returns the per-word gas factor charged on metered pops.
            pub const fn gas_factor(&self) -> u64 {
                match self {
                    $( OpCode::$name => $factor, )*
                }
            }
        }
    };
}

for_each_opcode!(define_opcodes);
