//! Core virtual machine implementation.
//!
//! The VM executes bytecode sequentially against a two-stack model: an
//! evaluation stack of byte values and a call stack of activation frames.
//! Every instruction first pays its base gas price; every metered pop pays
//! an additional per-word charge proportional to the popped value's length.
//! The first trapped error pushes a `"<opname>: <message>"` diagnostic and
//! terminates the execution.

use std::cmp::Ordering;

use num_bigint::{BigInt, Sign};
use num_traits::{Pow, ToPrimitive};
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::elliptic_curve::generic_array::GenericArray;
use p256::EncodedPoint;
use sha3::{Digest, Sha3_256};

use crate::types::big_int;
use crate::types::bytes::Bytes;
use crate::utils::log::Logger;
use crate::vm::array::Array;
use crate::vm::call_stack::{CallStack, Frame};
use crate::vm::context::Context;
use crate::vm::errors::VmError;
use crate::vm::eval_stack::{EvalStack, DEFAULT_MEMORY_MAX};
use crate::vm::map::Map;
use crate::vm::opcodes::{ArgKind, OpCode};
use crate::vm::structs::Struct;

/// Maximum accepted bytecode length in bytes.
pub const MAX_CODE_LEN: usize = 100_000;

/// Metered pops charge one gas factor unit per started 64-byte word.
const GAS_WORD_SIZE: usize = 64;

/// Tunable execution limits.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Evaluation-stack memory bound in bytes; values below 1 KiB are
    /// raised to it.
    pub memory_max: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            memory_max: DEFAULT_MEMORY_MAX,
        }
    }
}

/// What the dispatched instruction asks the execution loop to do next.
enum Flow {
    Continue,
    Halt,
    ErrHalt,
}

/// Stack-based bytecode virtual machine.
///
/// Executes the contract supplied by its [`Context`] until a halt
/// instruction or the first trap. The result of a run is the boolean
/// returned by [`Vm::exec`] plus the top of the evaluation stack: the
/// contract's result value on success, a diagnostic string on failure.
pub struct Vm<C: Context> {
    /// Bytecode to execute.
    code: Bytes,
    /// Program counter (current position in the bytecode).
    pc: usize,
    /// Remaining gas budget.
    gas: u64,
    /// Operand stack.
    eval_stack: EvalStack,
    /// Activation frames.
    call_stack: CallStack,
    /// Host-provided execution context.
    context: C,
    /// Sink for the optional per-instruction trace.
    logger: Logger,
}

impl<C: Context> Vm<C> {
    /// Creates a VM with the default configuration.
    pub fn new(context: C) -> Self {
        Self::with_config(context, VmConfig::default())
    }

    /// Creates a VM with explicit execution limits.
    pub fn with_config(context: C, config: VmConfig) -> Self {
        Self {
            code: Bytes::default(),
            pc: 0,
            gas: 0,
            eval_stack: EvalStack::new(config.memory_max),
            call_stack: CallStack::new(),
            context,
            logger: Logger::new("vm"),
        }
    }

    /// Executes the contract and stores the result on the evaluation stack.
    ///
    /// Returns `true` on a normal halt and `false` on any trap; in the
    /// latter case the top of the stack is the diagnostic string. With
    /// `trace` enabled every instruction is logged before it executes.
    pub fn exec(&mut self, trace: bool) -> bool {
        self.code = self.context.get_contract().into();
        self.gas = self.context.get_fee();
        self.pc = 0;

        if self.code.len() > MAX_CODE_LEN {
            self.push_diagnostic("vm.exec()", &VmError::CodeTooLarge);
            return false;
        }

        loop {
            if trace {
                self.trace();
            }

            let byte_code = match self.fetch() {
                Ok(byte_code) => byte_code,
                Err(err) => {
                    self.push_diagnostic("vm.exec()", &err);
                    return false;
                }
            };

            let op = match OpCode::try_from(byte_code) {
                Ok(op) => op,
                Err(err) => {
                    self.push_diagnostic("vm.exec()", &err);
                    return false;
                }
            };

            let price = op.gas_price();
            if self.gas < price {
                self.push_diagnostic("vm.exec()", &VmError::GasExhausted);
                return false;
            }
            self.gas -= price;

            match self.dispatch(op) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => return true,
                Ok(Flow::ErrHalt) => return false,
                Err(err) => {
                    self.push_diagnostic(op.name(), &err);
                    return false;
                }
            }
        }
    }

    /// Returns the element on top of the evaluation stack.
    pub fn peek_result(&self) -> Result<&[u8], VmError> {
        self.eval_stack.peek()
    }

    /// Returns a copy of the complete evaluation stack, bottom first.
    pub fn peek_eval_stack(&self) -> Vec<Vec<u8>> {
        self.eval_stack.snapshot()
    }

    /// Reads the top of the stack as a diagnostic string.
    pub fn error_message(&self) -> String {
        match self.eval_stack.peek() {
            Ok(top) => String::from_utf8_lossy(top).into_owned(),
            Err(err) => err.to_string(),
        }
    }

    /// Returns the unconsumed gas, observable for accounting.
    pub fn gas_remaining(&self) -> u64 {
        self.gas
    }

    /// Returns the current call depth.
    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    // ==================== Fetch and decode ====================

    /// Reads one byte at `pc` and advances.
    fn fetch(&mut self) -> Result<u8, VmError> {
        if self.code.len() > self.pc {
            let byte = self.code[self.pc];
            self.pc += 1;
            Ok(byte)
        } else {
            Err(VmError::CodeOutOfBounds)
        }
    }

    /// Reads `count` bytes starting at `pc` and advances.
    ///
    /// Requires strictly more than `count` bytes to remain, so an immediate
    /// can never consume the final byte of the bytecode.
    fn fetch_many(&mut self, count: usize) -> Result<Vec<u8>, VmError> {
        if self.code.len().saturating_sub(self.pc) > count {
            let bytes = self.code[self.pc..self.pc + count].to_vec();
            self.pc += count;
            Ok(bytes)
        } else {
            Err(VmError::CodeOutOfBounds)
        }
    }

    /// Reads a 2-byte big-endian code offset.
    fn fetch_label(&mut self) -> Result<usize, VmError> {
        let bytes = self.fetch_many(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]) as usize)
    }

    /// Reads a 2-byte big-endian immediate (struct sizes, field indices).
    fn fetch_u16(&mut self) -> Result<u16, VmError> {
        let bytes = self.fetch_many(2)?;
        big_int::u16_from_bytes(&bytes)
    }

    // ==================== Metered pops ====================

    /// Charges the per-word pop cost for a value of `length` bytes.
    fn charge_pop(&mut self, op: OpCode, length: usize) -> Result<(), VmError> {
        let words = length.div_ceil(GAS_WORD_SIZE) as u64;
        let cost = op.gas_factor() * words;
        if cost > self.gas {
            return Err(VmError::OutOfGas);
        }
        self.gas -= cost;
        Ok(())
    }

    /// Pops raw bytes, charging the per-word cost.
    fn pop_bytes(&mut self, op: OpCode) -> Result<Vec<u8>, VmError> {
        let value = self.eval_stack.pop()?;
        self.charge_pop(op, value.len())?;
        Ok(value)
    }

    /// Pops a sign-tagged big integer, charging the per-word cost.
    fn pop_signed(&mut self, op: OpCode) -> Result<BigInt, VmError> {
        let value = self.pop_bytes(op)?;
        big_int::decode_signed(&value)
    }

    /// Pops an untagged big integer, charging the per-word cost.
    fn pop_unsigned(&mut self, op: OpCode) -> Result<BigInt, VmError> {
        let value = self.pop_bytes(op)?;
        Ok(big_int::decode_unsigned(&value))
    }

    /// Pushes the wrapped diagnostic; a full stack drops the message but
    /// the failure result still stands.
    fn push_diagnostic(&mut self, location: &str, err: &VmError) {
        let _ = self
            .eval_stack
            .push(format!("{location}: {err}").into_bytes());
    }

    // ==================== Dispatch ====================

    fn dispatch(&mut self, op: OpCode) -> Result<Flow, VmError> {
        match op {
            // Stack manipulation
            OpCode::PushInt => self.op_push_int()?,
            OpCode::PushBool => self.op_push_bool()?,
            OpCode::PushChar => self.op_push_char()?,
            OpCode::PushStr => self.op_push_str()?,
            OpCode::Push => self.op_push()?,
            OpCode::Dup => self.op_dup(op)?,
            OpCode::Roll => self.op_roll()?,
            OpCode::Swap => self.op_swap()?,
            OpCode::Pop => {
                self.pop_bytes(op)?;
            }
            // Arithmetic
            OpCode::Add => self.op_big_int_binary(op, |left, right| left + right)?,
            OpCode::Sub => self.op_big_int_binary(op, |left, right| left - right)?,
            OpCode::Mul => self.op_big_int_binary(op, |left, right| left * right)?,
            OpCode::Div => self.op_div(op)?,
            OpCode::Mod => self.op_mod(op)?,
            OpCode::Neg => self.op_neg(op)?,
            OpCode::Exp => self.op_exp(op)?,
            // Comparison
            OpCode::Eq => self.op_eq(op, true)?,
            OpCode::NotEq => self.op_eq(op, false)?,
            OpCode::Lt => self.op_relational(op, &[Ordering::Less])?,
            OpCode::Gt => self.op_relational(op, &[Ordering::Greater])?,
            OpCode::LtEq => self.op_relational(op, &[Ordering::Less, Ordering::Equal])?,
            OpCode::GtEq => self.op_relational(op, &[Ordering::Equal, Ordering::Greater])?,
            // Bitwise
            OpCode::ShiftL => self.op_shift(op, true)?,
            OpCode::ShiftR => self.op_shift(op, false)?,
            OpCode::BitwiseAnd => self.op_big_int_binary(op, |left, right| left & right)?,
            OpCode::BitwiseOr => self.op_big_int_binary(op, |left, right| left | right)?,
            OpCode::BitwiseXor => self.op_big_int_binary(op, |left, right| left ^ right)?,
            OpCode::BitwiseNot => self.op_bitwise_not(op)?,
            // Control flow
            OpCode::NoOp => {
                self.fetch()?;
            }
            OpCode::Jmp => {
                self.pc = self.fetch_label()?;
            }
            OpCode::JmpTrue => self.op_jmp_cond(op, true)?,
            OpCode::JmpFalse => self.op_jmp_cond(op, false)?,
            OpCode::Call => self.op_call(op, false)?,
            OpCode::CallTrue => self.op_call(op, true)?,
            OpCode::CallExt => self.op_call_ext()?,
            OpCode::Ret => self.op_ret()?,
            OpCode::Halt => return Ok(Flow::Halt),
            OpCode::ErrHalt => return Ok(Flow::ErrHalt),
            // Locals and contract variables
            OpCode::Size => self.op_size(op)?,
            OpCode::StoreLoc => self.op_store_loc(op)?,
            OpCode::StoreSt => self.op_store_st(op)?,
            OpCode::LoadLoc => self.op_load_loc()?,
            OpCode::LoadSt => self.op_load_st()?,
            // Context
            OpCode::Address => {
                let address = self.context.get_address();
                self.eval_stack.push(address.to_vec())?;
            }
            OpCode::Issuer => {
                let issuer = self.context.get_issuer();
                self.eval_stack.push(issuer.to_vec())?;
            }
            OpCode::Balance => {
                let balance = big_int::u64_to_bytes(self.context.get_balance());
                self.eval_stack.push(balance.to_vec())?;
            }
            OpCode::Caller => {
                let sender = self.context.get_sender();
                self.eval_stack.push(sender.to_vec())?;
            }
            OpCode::CallVal => {
                let amount = big_int::u64_to_bytes(self.context.get_amount());
                self.eval_stack.push(amount.to_vec())?;
            }
            OpCode::CallData => self.op_call_data()?,
            // Containers
            OpCode::NewMap => {
                self.eval_stack.push(Map::new().to_bytes())?;
            }
            OpCode::MapHasKey => self.op_map_has_key(op)?,
            OpCode::MapGetVal => self.op_map_get_val(op)?,
            OpCode::MapSetVal => self.op_map_set_val(op)?,
            OpCode::MapRemove => self.op_map_remove(op)?,
            OpCode::NewArr => self.op_new_arr(op)?,
            OpCode::ArrAppend => self.op_arr_append(op)?,
            OpCode::ArrInsert => self.op_arr_insert(op)?,
            OpCode::ArrRemove => self.op_arr_remove(op)?,
            OpCode::ArrAt => self.op_arr_at(op)?,
            OpCode::ArrLen => self.op_arr_len(op)?,
            OpCode::NewStr => self.op_new_str()?,
            OpCode::StoreFld => self.op_store_fld(op)?,
            OpCode::LoadFld => self.op_load_fld(op)?,
            // Cryptographic
            OpCode::Sha3 => self.op_sha3(op)?,
            OpCode::CheckSig => self.op_check_sig(op)?,
        }
        Ok(Flow::Continue)
    }

    // ==================== Stack manipulation ====================

    fn op_push_int(&mut self) -> Result<(), VmError> {
        let total_bytes = self.fetch()?;
        if total_bytes == 0 {
            return self.eval_stack.push(vec![0]);
        }
        // Sign tag plus magnitude.
        let bytes = self.fetch_many(total_bytes as usize + 1)?;
        self.eval_stack.push(bytes)
    }

    fn op_push_bool(&mut self) -> Result<(), VmError> {
        let value = self.fetch()?;
        if value > 1 {
            return Err(VmError::InvalidBool(value));
        }
        self.eval_stack.push(vec![value])
    }

    fn op_push_char(&mut self) -> Result<(), VmError> {
        let value = self.fetch()?;
        if value > 127 {
            return Err(VmError::InvalidAscii(value));
        }
        self.eval_stack.push(vec![value])
    }

    fn op_push_str(&mut self) -> Result<(), VmError> {
        let length = self.fetch()?;
        let bytes = self.fetch_many(length as usize)?;
        if let Some(&invalid) = bytes.iter().find(|&&byte| byte > 127) {
            return Err(VmError::InvalidAscii(invalid));
        }
        self.eval_stack.push(bytes)
    }

    fn op_push(&mut self) -> Result<(), VmError> {
        let length = self.fetch()?;
        let bytes = self.fetch_many(length as usize)?;
        self.eval_stack.push(bytes)
    }

    fn op_dup(&mut self, op: OpCode) -> Result<(), VmError> {
        let top = self.pop_bytes(op)?;
        self.eval_stack.push(top.clone())?;
        self.eval_stack.push(top)
    }

    fn op_roll(&mut self) -> Result<(), VmError> {
        let arg = self.fetch()? as usize;
        let stack_len = self.eval_stack.len();
        // The source position is arg + 2 below the top; when that is the
        // top itself the roll is a no-op.
        if stack_len == arg + 1 {
            return Ok(());
        }
        if arg >= stack_len {
            return Err(VmError::InvalidStackIndex);
        }
        let value = self.eval_stack.pop_index_at(stack_len - (arg + 2))?;
        self.eval_stack.push(value)
    }

    fn op_swap(&mut self) -> Result<(), VmError> {
        let last = self.eval_stack.pop()?;
        let second_last = self.eval_stack.pop()?;
        self.eval_stack.push(last)?;
        self.eval_stack.push(second_last)
    }

    // ==================== Arithmetic ====================

    fn op_big_int_binary(
        &mut self,
        op: OpCode,
        apply: fn(&BigInt, &BigInt) -> BigInt,
    ) -> Result<(), VmError> {
        let right = self.pop_signed(op)?;
        let left = self.pop_signed(op)?;
        self.eval_stack
            .push(big_int::encode_signed(&apply(&left, &right)))
    }

    fn op_div(&mut self, op: OpCode) -> Result<(), VmError> {
        let right = self.pop_signed(op)?;
        let left = self.pop_signed(op)?;
        if right.sign() == Sign::NoSign {
            return Err(VmError::DivisionByZero);
        }
        self.eval_stack
            .push(big_int::encode_signed(&big_int::div_euclid(&left, &right)))
    }

    fn op_mod(&mut self, op: OpCode) -> Result<(), VmError> {
        let right = self.pop_signed(op)?;
        let left = self.pop_signed(op)?;
        if right.sign() == Sign::NoSign {
            return Err(VmError::DivisionByZero);
        }
        self.eval_stack
            .push(big_int::encode_signed(&big_int::mod_euclid(&left, &right)))
    }

    fn op_neg(&mut self, op: OpCode) -> Result<(), VmError> {
        let mut value = self.pop_bytes(op)?;
        let first = value.first_mut().ok_or(VmError::NegateEmpty)?;
        match *first {
            0 => *first = 1,
            1 => *first = 0,
            other => return Err(VmError::UnableToNegate(other)),
        }
        self.eval_stack.push(value)
    }

    fn op_exp(&mut self, op: OpCode) -> Result<(), VmError> {
        let left = self.pop_signed(op)?;
        let right = self.pop_signed(op)?;
        if right.sign() == Sign::Minus {
            return Err(VmError::NegativeExponent);
        }

        // base ** n costs as much as n multiplications; the dispatch price
        // already covered one of them.
        let exponent = right.to_u64().ok_or(VmError::OutOfGas)?;
        let surcharge = op.gas_price().saturating_mul(exponent.saturating_sub(1));
        if surcharge > self.gas {
            return Err(VmError::OutOfGas);
        }
        self.gas -= surcharge;

        self.eval_stack
            .push(big_int::encode_signed(&Pow::pow(left, exponent)))
    }

    // ==================== Comparison ====================

    fn op_eq(&mut self, op: OpCode, expect_equal: bool) -> Result<(), VmError> {
        let right = self.pop_bytes(op)?;
        let left = self.pop_bytes(op)?;
        self.eval_stack
            .push(bool_to_bytes((left == right) == expect_equal))
    }

    fn op_relational(&mut self, op: OpCode, accept: &[Ordering]) -> Result<(), VmError> {
        let right = self.pop_bytes(op)?;
        let left = self.pop_bytes(op)?;
        // Chars are always a single byte and compare byte-wise; everything
        // else compares as signed big integers.
        let ordering = if left.len() == 1 && right.len() == 1 {
            left.cmp(&right)
        } else {
            big_int::decode_signed(&left)?.cmp(&big_int::decode_signed(&right)?)
        };
        self.eval_stack.push(bool_to_bytes(accept.contains(&ordering)))
    }

    // ==================== Bitwise ====================

    fn op_shift(&mut self, op: OpCode, left_shift: bool) -> Result<(), VmError> {
        let shifts = self.pop_signed(op)?;
        let value = self.pop_signed(op)?;
        let count = big_int::to_u32_abs(&shifts)? as usize;
        let result = if left_shift {
            value << count
        } else {
            value >> count
        };
        self.eval_stack.push(big_int::encode_signed(&result))
    }

    fn op_bitwise_not(&mut self, op: OpCode) -> Result<(), VmError> {
        let value = self.pop_signed(op)?;
        self.eval_stack.push(big_int::encode_signed(&-(value + 1_i32)))
    }

    // ==================== Control flow ====================

    fn op_jmp_cond(&mut self, op: OpCode, jump_if: bool) -> Result<(), VmError> {
        let target = self.fetch_label()?;
        let condition = self.pop_bytes(op)?;
        if bytes_to_bool(&condition) == jump_if {
            self.pc = target;
        }
        Ok(())
    }

    fn op_call(&mut self, op: OpCode, conditional: bool) -> Result<(), VmError> {
        let target = self.fetch_label()?;
        let args_to_load = self.fetch()?;
        // The immediate is an unsigned byte, so the declared return count
        // can never be negative.
        let return_count = self.fetch()?;

        if conditional {
            let condition = self.pop_bytes(op)?;
            if !bytes_to_bool(&condition) {
                return Ok(());
            }
        }

        if target == 0 || target > self.code.len() {
            return Err(VmError::ReturnAddressOutOfBounds);
        }

        let mut frame = Frame::new(self.pc, return_count as usize);
        // Arguments are popped in reverse so the first pushed argument
        // lands in local 0.
        for index in (0..args_to_load as usize).rev() {
            frame.store_local(index, self.pop_bytes(op)?);
        }
        frame.eval_stack_offset = self.eval_stack.len();

        self.call_stack.push(frame);
        self.pc = target;
        Ok(())
    }

    fn op_call_ext(&mut self) -> Result<(), VmError> {
        let _address = self.fetch_many(32)?;
        let _function_hash = self.fetch_many(4)?;
        let _args_to_load = self.fetch()?;
        // Cross-contract invocation is settled by the host; the VM's share
        // is decoding the invocation header and charging the table gas.
        Ok(())
    }

    fn op_ret(&mut self) -> Result<(), VmError> {
        let frame = self.call_stack.peek()?;
        let returned = self.eval_stack.len().checked_sub(frame.eval_stack_offset);
        if returned != Some(frame.return_count) {
            return Err(VmError::ReturnCountMismatch);
        }
        let return_address = frame.return_address;
        self.call_stack.pop()?;
        self.pc = return_address;
        Ok(())
    }

    // ==================== Locals and contract variables ====================

    fn op_size(&mut self, op: OpCode) -> Result<(), VmError> {
        let value = self.pop_bytes(op)?;
        self.eval_stack
            .push(big_int::u64_to_bytes(value.len() as u64).to_vec())
    }

    fn op_store_loc(&mut self, op: OpCode) -> Result<(), VmError> {
        let index = self.fetch()?;
        let value = self.pop_bytes(op)?;
        let frame = self.call_stack.peek_mut()?;
        frame.store_local(index as usize, value);
        Ok(())
    }

    fn op_load_loc(&mut self) -> Result<(), VmError> {
        let index = self.fetch()?;
        let value = self.call_stack.peek()?.load_local(index as usize);
        self.eval_stack.push(value)
    }

    fn op_store_st(&mut self, op: OpCode) -> Result<(), VmError> {
        let index = self.fetch()?;
        let value = self.pop_bytes(op)?;
        self.context.set_contract_variable(index as usize, value)
    }

    fn op_load_st(&mut self) -> Result<(), VmError> {
        let index = self.fetch()?;
        let value = self.context.get_contract_variable(index as usize)?;
        self.eval_stack.push(value)
    }

    // ==================== Context ====================

    fn op_call_data(&mut self) -> Result<(), VmError> {
        let data = self.context.get_transaction_data();
        let mut index = 0;
        while index < data.len() {
            let length = data[index] as usize;
            if data.len() - index - 1 < length {
                return Err(VmError::IndexOutOfBounds);
            }
            self.eval_stack
                .push(data[index + 1..index + 1 + length].to_vec())?;
            index += length + 1;
        }
        Ok(())
    }

    // ==================== Containers ====================

    fn op_map_has_key(&mut self, op: OpCode) -> Result<(), VmError> {
        let map_bytes = self.pop_bytes(op)?;
        let map = Map::from_bytes(&map_bytes)?;
        let key = self.pop_bytes(op)?;
        self.eval_stack.push(bool_to_bytes(map.contains(&key)))
    }

    fn op_map_get_val(&mut self, op: OpCode) -> Result<(), VmError> {
        let map_bytes = self.pop_bytes(op)?;
        let key = self.pop_bytes(op)?;
        let map = Map::from_bytes(&map_bytes)?;
        let value = map.get(&key)?.to_vec();
        self.eval_stack.push(value)
    }

    fn op_map_set_val(&mut self, op: OpCode) -> Result<(), VmError> {
        let map_bytes = self.pop_bytes(op)?;
        let mut map = Map::from_bytes(&map_bytes)?;
        let key = self.pop_bytes(op)?;
        let value = self.pop_bytes(op)?;
        if map.contains(&key) {
            map.set(&key, value)?;
        } else {
            map.append(key, value)?;
        }
        self.eval_stack.push(map.to_bytes())
    }

    fn op_map_remove(&mut self, op: OpCode) -> Result<(), VmError> {
        let map_bytes = self.pop_bytes(op)?;
        let key = self.pop_bytes(op)?;
        let mut map = Map::from_bytes(&map_bytes)?;
        map.remove(&key)?;
        self.eval_stack.push(map.to_bytes())
    }

    fn op_new_arr(&mut self, op: OpCode) -> Result<(), VmError> {
        let length = self.pop_unsigned(op)?;
        let size = big_int::to_u16_abs(&length)?;
        let mut array = Array::new();
        for _ in 0..size {
            array.append(vec![0])?;
        }
        self.eval_stack.push(array.to_bytes())
    }

    fn op_arr_append(&mut self, op: OpCode) -> Result<(), VmError> {
        let array_bytes = self.pop_bytes(op)?;
        let value = self.pop_bytes(op)?;
        let mut array = Array::from_bytes(&array_bytes)?;
        array.append(value)?;
        self.eval_stack.push(array.to_bytes())
    }

    fn op_arr_insert(&mut self, op: OpCode) -> Result<(), VmError> {
        let array_bytes = self.pop_bytes(op)?;
        let index_big = self.pop_unsigned(op)?;
        let element = self.pop_bytes(op)?;
        let mut array = Array::from_bytes(&array_bytes)?;
        let index = big_int::to_u16_abs(&index_big)?;
        if index >= array.size() {
            return Err(VmError::IndexOutOfBounds);
        }
        array.insert(index, element)?;
        self.eval_stack.push(array.to_bytes())
    }

    fn op_arr_remove(&mut self, op: OpCode) -> Result<(), VmError> {
        let array_bytes = self.pop_bytes(op)?;
        let index_big = self.pop_unsigned(op)?;
        let index = big_int::to_u16_abs(&index_big)?;
        let mut array = Array::from_bytes(&array_bytes)?;
        array.remove(index)?;
        self.eval_stack.push(array.to_bytes())
    }

    fn op_arr_at(&mut self, op: OpCode) -> Result<(), VmError> {
        let array_bytes = self.pop_bytes(op)?;
        let index_big = self.pop_unsigned(op)?;
        let index = big_int::to_u16_abs(&index_big)?;
        let array = Array::from_bytes(&array_bytes)?;
        let element = array.at(index)?.to_vec();
        self.eval_stack.push(element)
    }

    fn op_arr_len(&mut self, op: OpCode) -> Result<(), VmError> {
        let array_bytes = self.pop_bytes(op)?;
        let array = Array::from_bytes(&array_bytes)?;
        self.eval_stack
            .push(big_int::encode_signed(&BigInt::from(array.size())))
    }

    fn op_new_str(&mut self) -> Result<(), VmError> {
        let size = self.fetch_u16()?;
        self.eval_stack.push(Struct::new(size).to_bytes())
    }

    fn op_store_fld(&mut self, op: OpCode) -> Result<(), VmError> {
        let index = self.fetch_u16()?;
        let element = self.pop_bytes(op)?;
        let struct_bytes = self.pop_bytes(op)?;
        let mut value = Struct::from_bytes(&struct_bytes)?;
        value.store_field(index, element)?;
        self.eval_stack.push(value.to_bytes())
    }

    fn op_load_fld(&mut self, op: OpCode) -> Result<(), VmError> {
        let index = self.fetch_u16()?;
        let struct_bytes = self.pop_bytes(op)?;
        let value = Struct::from_bytes(&struct_bytes)?;
        let element = value.load_field(index)?.to_vec();
        self.eval_stack.push(element)
    }

    // ==================== Cryptographic ====================

    fn op_sha3(&mut self, op: OpCode) -> Result<(), VmError> {
        let value = self.pop_bytes(op)?;
        let mut hasher = Sha3_256::new();
        hasher.update(&value);
        self.eval_stack.push(hasher.finalize().to_vec())
    }

    fn op_check_sig(&mut self, op: OpCode) -> Result<(), VmError> {
        let public_key = self.pop_bytes(op)?;
        let hash = self.pop_bytes(op)?;
        if public_key.len() != 64 {
            return Err(VmError::InvalidSignatureAddress);
        }
        if hash.len() != 32 {
            return Err(VmError::InvalidSignatureHash);
        }
        let signature = self.context.get_sig1();
        let result = verify_p256(&public_key, &hash, &signature);
        self.eval_stack.push(bool_to_bytes(result))
    }

    // ==================== Trace ====================

    /// Logs the instruction at `pc` together with gas and stack state,
    /// without advancing execution.
    fn trace(&self) {
        let Some(&byte_code) = self.code.get(self.pc) else {
            return;
        };
        let Ok(op) = OpCode::try_from(byte_code) else {
            self.logger
                .warn(&format!("{:04}: invalid opcode {byte_code:#04x}", self.pc));
            return;
        };

        let mut args = String::new();
        let mut cursor = self.pc + 1;
        for kind in op.arg_kinds() {
            let width = match kind {
                ArgKind::Byte => 1,
                ArgKind::Label => 2,
                ArgKind::Addr => 32,
                ArgKind::Bytes => match self.code.get(cursor) {
                    Some(&length) => 1 + length as usize,
                    None => break,
                },
            };
            match self.code.get(cursor..cursor + width) {
                Some(bytes) => args.push_str(&format!("{bytes:?} ")),
                None => break,
            }
            cursor += width;
        }

        self.logger.info(&format!(
            "{:04}: {:<9} {}| gas={} stack={} mem={}",
            self.pc,
            op.name(),
            args,
            self.gas,
            self.eval_stack.len(),
            self.eval_stack.memory_usage(),
        ));
    }
}

/// Encodes a boolean as its single-byte stack form.
fn bool_to_bytes(value: bool) -> Vec<u8> {
    vec![value as u8]
}

/// Reads a popped value as a boolean: non-zero first byte means true.
fn bytes_to_bool(value: &[u8]) -> bool {
    value.first().is_some_and(|&byte| byte != 0)
}

/// Verifies an ECDSA P-256 signature `r ‖ s` over a prehashed message.
/// Unparseable keys or signatures verify as false.
fn verify_p256(public_key: &[u8], hash: &[u8], signature: &[u8; 64]) -> bool {
    let point = EncodedPoint::from_affine_coordinates(
        GenericArray::from_slice(&public_key[..32]),
        GenericArray::from_slice(&public_key[32..]),
        false,
    );
    let Ok(key) = VerifyingKey::from_encoded_point(&point) else {
        return false;
    };
    let r = p256::FieldBytes::clone_from_slice(&signature[..32]);
    let s = p256::FieldBytes::clone_from_slice(&signature[32..]);
    let Ok(parsed) = Signature::from_scalars(r, s) else {
        return false;
    };
    key.verify_prehash(hash, &parsed).is_ok()
}
