//! Script interpreter and validation.
//!
//! Covers the opcodes standard outputs and their P2SH redeem scripts use:
//! pushes, small integers, flow control, stack shuffles, hashing,
//! equality, signature checks and CHECKLOCKTIMEVERIFY.

use std::sync::OnceLock;

use ripemd::{Digest as RipemdDigest, Ripemd160};
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, VerifyOnly};
use sha1::Sha1;
use zend_consensus::constants::{LOCKTIME_THRESHOLD, MAX_SCRIPT_SIZE};
use zend_primitives::hash::{hash160, sha256, sha256d};
use zend_primitives::txbase::{TxBase, TxLike};

use crate::sighash::{signature_hash, SighashType, SIGHASH_NONE, SIGHASH_SINGLE};
use crate::standard::is_p2sh;

pub type ScriptFlags = u32;

pub const SCRIPT_VERIFY_NONE: ScriptFlags = 0;
pub const SCRIPT_VERIFY_P2SH: ScriptFlags = 1 << 0;
pub const SCRIPT_VERIFY_STRICTENC: ScriptFlags = 1 << 1;
pub const SCRIPT_VERIFY_LOW_S: ScriptFlags = 1 << 3;
pub const SCRIPT_VERIFY_NULLDUMMY: ScriptFlags = 1 << 4;
pub const SCRIPT_VERIFY_SIGPUSHONLY: ScriptFlags = 1 << 5;
pub const SCRIPT_VERIFY_MINIMALDATA: ScriptFlags = 1 << 6;
pub const SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS: ScriptFlags = 1 << 7;
pub const SCRIPT_VERIFY_CLEANSTACK: ScriptFlags = 1 << 8;
pub const SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY: ScriptFlags = 1 << 9;

pub const MANDATORY_SCRIPT_VERIFY_FLAGS: ScriptFlags = SCRIPT_VERIFY_P2SH;
pub const STANDARD_SCRIPT_VERIFY_FLAGS: ScriptFlags = MANDATORY_SCRIPT_VERIFY_FLAGS
    | SCRIPT_VERIFY_STRICTENC
    | SCRIPT_VERIFY_MINIMALDATA
    | SCRIPT_VERIFY_NULLDUMMY
    | SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS
    | SCRIPT_VERIFY_CLEANSTACK
    | SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY
    | SCRIPT_VERIFY_LOW_S;
pub const BLOCK_SCRIPT_VERIFY_FLAGS: ScriptFlags =
    SCRIPT_VERIFY_P2SH | SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY;

pub(crate) const OP_0: u8 = 0x00;
pub(crate) const OP_PUSHDATA1: u8 = 0x4c;
pub(crate) const OP_PUSHDATA2: u8 = 0x4d;
pub(crate) const OP_PUSHDATA4: u8 = 0x4e;
pub(crate) const OP_1NEGATE: u8 = 0x4f;
pub(crate) const OP_1: u8 = 0x51;
pub(crate) const OP_16: u8 = 0x60;
const OP_IF: u8 = 0x63;
const OP_NOTIF: u8 = 0x64;
const OP_ELSE: u8 = 0x67;
const OP_ENDIF: u8 = 0x68;
const OP_VERIFY: u8 = 0x69;
pub(crate) const OP_RETURN: u8 = 0x6a;
const OP_2DROP: u8 = 0x6d;
const OP_DROP: u8 = 0x75;
pub(crate) const OP_DUP: u8 = 0x76;
const OP_SIZE: u8 = 0x82;
pub(crate) const OP_EQUAL: u8 = 0x87;
pub(crate) const OP_EQUALVERIFY: u8 = 0x88;
const OP_RIPEMD160: u8 = 0xa6;
const OP_SHA1: u8 = 0xa7;
const OP_SHA256: u8 = 0xa8;
pub(crate) const OP_HASH160: u8 = 0xa9;
const OP_HASH256: u8 = 0xaa;
const OP_CODESEPARATOR: u8 = 0xab;
pub(crate) const OP_CHECKSIG: u8 = 0xac;
pub(crate) const OP_CHECKSIGVERIFY: u8 = 0xad;
pub(crate) const OP_CHECKMULTISIG: u8 = 0xae;
pub(crate) const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;
const OP_NOP1: u8 = 0xb0;
const OP_CHECKLOCKTIMEVERIFY: u8 = 0xb1;
const OP_NOP3: u8 = 0xb2;
const OP_NOP10: u8 = 0xb9;

const MAX_STACK_SIZE: usize = 1_000;
const MAX_PUBKEYS_PER_MULTISIG: i64 = 20;

static VERIFY_CONTEXT: OnceLock<Secp256k1<VerifyOnly>> = OnceLock::new();

#[derive(Debug, PartialEq, Eq)]
pub enum ScriptError {
    StackUnderflow,
    StackSize,
    ScriptSize,
    EvalFalse,
    OpReturn,
    InvalidOpcode(u8),
    UnbalancedConditional,
    BadPush,
    SigEncoding,
    PubkeyEncoding,
    SigHashType,
    SigCheck,
    SigPushOnly,
    NullDummy,
    LockTime,
    MinimalData,
    CleanStack,
    NumOverflow,
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptError::StackUnderflow => write!(f, "script stack underflow"),
            ScriptError::StackSize => write!(f, "script stack too large"),
            ScriptError::ScriptSize => write!(f, "script too large"),
            ScriptError::EvalFalse => write!(f, "script evaluated to false"),
            ScriptError::OpReturn => write!(f, "OP_RETURN executed"),
            ScriptError::InvalidOpcode(op) => write!(f, "invalid opcode 0x{op:02x}"),
            ScriptError::UnbalancedConditional => write!(f, "unbalanced conditional"),
            ScriptError::BadPush => write!(f, "push past end of script"),
            ScriptError::SigEncoding => write!(f, "invalid signature encoding"),
            ScriptError::PubkeyEncoding => write!(f, "invalid public key encoding"),
            ScriptError::SigHashType => write!(f, "invalid sighash type"),
            ScriptError::SigCheck => write!(f, "signature check failed"),
            ScriptError::SigPushOnly => write!(f, "scriptSig is not push-only"),
            ScriptError::NullDummy => write!(f, "null dummy element required"),
            ScriptError::LockTime => write!(f, "locktime check failed"),
            ScriptError::MinimalData => write!(f, "non-minimal push"),
            ScriptError::CleanStack => write!(f, "extra items left on stack"),
            ScriptError::NumOverflow => write!(f, "script number overflow"),
        }
    }
}

impl std::error::Error for ScriptError {}

/// Signature and lock-time oracle the interpreter consults.
pub trait SignatureChecker {
    fn check_sig(
        &self,
        sig: &[u8],
        pubkey: &[u8],
        script_code: &[u8],
        flags: ScriptFlags,
    ) -> Result<bool, ScriptError>;

    fn check_lock_time(&self, lock_time: i64) -> Result<(), ScriptError>;
}

/// Checks signatures against the legacy sighash of one input.
pub struct TxSignatureChecker<'a> {
    pub entry: &'a TxBase,
    pub input_index: usize,
}

impl<'a> TxSignatureChecker<'a> {
    pub fn new(entry: &'a TxBase, input_index: usize) -> Self {
        Self { entry, input_index }
    }
}

impl SignatureChecker for TxSignatureChecker<'_> {
    fn check_sig(
        &self,
        sig_bytes: &[u8],
        pubkey_bytes: &[u8],
        script_code: &[u8],
        flags: ScriptFlags,
    ) -> Result<bool, ScriptError> {
        let Some((&hash_type, der)) = sig_bytes.split_last() else {
            return Ok(false);
        };
        let hash_type = u32::from(hash_type);
        if (flags & SCRIPT_VERIFY_STRICTENC) != 0 {
            let base = hash_type & 0x1f;
            if base != 0x01 && base != SIGHASH_NONE && base != SIGHASH_SINGLE {
                return Err(ScriptError::SigHashType);
            }
            if !is_valid_pubkey(pubkey_bytes) {
                return Err(ScriptError::PubkeyEncoding);
            }
        }

        let sig = Signature::from_der(der).map_err(|_| ScriptError::SigEncoding)?;
        let mut normalized = sig;
        normalized.normalize_s();
        if (flags & SCRIPT_VERIFY_LOW_S) != 0 && normalized != sig {
            return Err(ScriptError::SigEncoding);
        }

        let Ok(pubkey) = PublicKey::from_slice(pubkey_bytes) else {
            return Ok(false);
        };
        let Ok(sighash) = signature_hash(
            self.entry,
            self.input_index,
            script_code,
            SighashType(hash_type),
        ) else {
            return Ok(false);
        };
        let msg = Message::from_digest(sighash);
        Ok(VERIFY_CONTEXT
            .get_or_init(Secp256k1::verification_only)
            .verify_ecdsa(&msg, &normalized, &pubkey)
            .is_ok())
    }

    fn check_lock_time(&self, lock_time: i64) -> Result<(), ScriptError> {
        let (tx_lock_time, sequence) = match self.entry {
            TxBase::Tx(tx) => (
                i64::from(tx.lock_time),
                tx.vin.get(self.input_index).map(|input| input.sequence),
            ),
            // Certificates have no lock time field.
            TxBase::Cert(_) => return Err(ScriptError::LockTime),
        };
        let threshold = i64::from(LOCKTIME_THRESHOLD);
        if (tx_lock_time < threshold) != (lock_time < threshold) {
            return Err(ScriptError::LockTime);
        }
        if lock_time > tx_lock_time {
            return Err(ScriptError::LockTime);
        }
        if sequence == Some(u32::MAX) {
            return Err(ScriptError::LockTime);
        }
        Ok(())
    }
}

/// Runs `script_sig` then `script_pubkey` (and the redeem script for P2SH).
pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    flags: ScriptFlags,
    checker: &dyn SignatureChecker,
) -> Result<(), ScriptError> {
    if (flags & SCRIPT_VERIFY_SIGPUSHONLY) != 0 && !is_push_only(script_sig) {
        return Err(ScriptError::SigPushOnly);
    }

    let mut stack = Vec::new();
    eval_script(script_sig, &mut stack, flags, checker)?;
    let p2sh_stack = stack.clone();
    eval_script(script_pubkey, &mut stack, flags, checker)?;
    if !top_is_true(&stack) {
        return Err(ScriptError::EvalFalse);
    }

    if (flags & SCRIPT_VERIFY_P2SH) != 0 && is_p2sh(script_pubkey) {
        if !is_push_only(script_sig) {
            return Err(ScriptError::SigPushOnly);
        }
        stack = p2sh_stack;
        let redeem_script = pop(&mut stack)?;
        eval_script(&redeem_script, &mut stack, flags, checker)?;
        if !top_is_true(&stack) {
            return Err(ScriptError::EvalFalse);
        }
    }

    if (flags & SCRIPT_VERIFY_CLEANSTACK) != 0 && stack.len() != 1 {
        return Err(ScriptError::CleanStack);
    }
    Ok(())
}

/// Convenience wrapper verifying input `input_index` of `entry`.
pub fn verify_input(
    entry: &TxBase,
    input_index: usize,
    script_pubkey: &[u8],
    flags: ScriptFlags,
) -> Result<(), ScriptError> {
    let script_sig = entry
        .inputs()
        .get(input_index)
        .map(|input| input.script_sig.as_slice())
        .ok_or(ScriptError::StackUnderflow)?;
    let checker = TxSignatureChecker::new(entry, input_index);
    verify_script(script_sig, script_pubkey, flags, &checker)
}

fn eval_script(
    script: &[u8],
    stack: &mut Vec<Vec<u8>>,
    flags: ScriptFlags,
    checker: &dyn SignatureChecker,
) -> Result<(), ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }
    let mut cursor = 0usize;
    let mut code_start = 0usize;
    let mut branches: Vec<bool> = Vec::new();

    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        let exec = branches.iter().all(|taken| *taken);

        if opcode <= OP_PUSHDATA4 {
            let data = read_push(script, &mut cursor, opcode)?;
            if exec {
                if (flags & SCRIPT_VERIFY_MINIMALDATA) != 0 && !is_minimal_push(&data, opcode) {
                    return Err(ScriptError::MinimalData);
                }
                stack.push(data);
            }
        } else if matches!(opcode, OP_IF | OP_NOTIF) {
            let taken = if exec {
                let value = cast_to_bool(&pop(stack)?);
                value != (opcode == OP_NOTIF)
            } else {
                false
            };
            branches.push(taken);
        } else if opcode == OP_ELSE {
            let last = branches
                .last_mut()
                .ok_or(ScriptError::UnbalancedConditional)?;
            *last = !*last;
        } else if opcode == OP_ENDIF {
            branches.pop().ok_or(ScriptError::UnbalancedConditional)?;
        } else if exec {
            let script_code = &script[code_start..];
            if opcode == OP_CODESEPARATOR {
                code_start = cursor;
            } else {
                exec_opcode(opcode, stack, flags, checker, script_code)?;
            }
        }

        if stack.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackSize);
        }
    }

    if !branches.is_empty() {
        return Err(ScriptError::UnbalancedConditional);
    }
    Ok(())
}

fn exec_opcode(
    opcode: u8,
    stack: &mut Vec<Vec<u8>>,
    flags: ScriptFlags,
    checker: &dyn SignatureChecker,
    script_code: &[u8],
) -> Result<(), ScriptError> {
    match opcode {
        OP_1NEGATE => stack.push(script_num_to_vec(-1)),
        OP_1..=OP_16 => stack.push(script_num_to_vec(i64::from(opcode - OP_1 + 1))),
        OP_VERIFY => {
            if !cast_to_bool(&pop(stack)?) {
                return Err(ScriptError::EvalFalse);
            }
        }
        OP_RETURN => return Err(ScriptError::OpReturn),
        OP_DROP => {
            pop(stack)?;
        }
        OP_2DROP => {
            pop(stack)?;
            pop(stack)?;
        }
        OP_DUP => {
            let top = stack.last().ok_or(ScriptError::StackUnderflow)?.clone();
            stack.push(top);
        }
        OP_SIZE => {
            let len = stack.last().ok_or(ScriptError::StackUnderflow)?.len();
            stack.push(script_num_to_vec(len as i64));
        }
        OP_EQUAL | OP_EQUALVERIFY => {
            let a = pop(stack)?;
            let b = pop(stack)?;
            if opcode == OP_EQUALVERIFY {
                if a != b {
                    return Err(ScriptError::EvalFalse);
                }
            } else {
                stack.push(bool_to_vec(a == b));
            }
        }
        OP_RIPEMD160 => {
            let data = pop(stack)?;
            stack.push(Ripemd160::digest(data).to_vec());
        }
        OP_SHA1 => {
            let data = pop(stack)?;
            stack.push(Sha1::digest(data).to_vec());
        }
        OP_SHA256 => {
            let data = pop(stack)?;
            stack.push(sha256(&data).to_vec());
        }
        OP_HASH160 => {
            let data = pop(stack)?;
            stack.push(hash160(&data).to_vec());
        }
        OP_HASH256 => {
            let data = pop(stack)?;
            stack.push(sha256d(&data).to_vec());
        }
        OP_CHECKSIG | OP_CHECKSIGVERIFY => {
            let pubkey = pop(stack)?;
            let sig = pop(stack)?;
            let ok = checker.check_sig(&sig, &pubkey, script_code, flags)?;
            if opcode == OP_CHECKSIGVERIFY {
                if !ok {
                    return Err(ScriptError::SigCheck);
                }
            } else {
                stack.push(bool_to_vec(ok));
            }
        }
        OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
            let ok = check_multisig(stack, flags, checker, script_code)?;
            if opcode == OP_CHECKMULTISIGVERIFY {
                if !ok {
                    return Err(ScriptError::SigCheck);
                }
            } else {
                stack.push(bool_to_vec(ok));
            }
        }
        OP_CHECKLOCKTIMEVERIFY => {
            if (flags & SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY) != 0 {
                let top = stack.last().ok_or(ScriptError::StackUnderflow)?;
                let lock_time = decode_script_num(top, 5)?;
                if lock_time < 0 {
                    return Err(ScriptError::LockTime);
                }
                checker.check_lock_time(lock_time)?;
            } else if (flags & SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS) != 0 {
                return Err(ScriptError::InvalidOpcode(opcode));
            }
        }
        OP_NOP1 | OP_NOP3..=OP_NOP10 => {
            if (flags & SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS) != 0 {
                return Err(ScriptError::InvalidOpcode(opcode));
            }
        }
        _ => {
            zend_log::log_trace!("unsupported opcode 0x{opcode:02x}");
            return Err(ScriptError::InvalidOpcode(opcode));
        }
    }
    Ok(())
}

fn check_multisig(
    stack: &mut Vec<Vec<u8>>,
    flags: ScriptFlags,
    checker: &dyn SignatureChecker,
    script_code: &[u8],
) -> Result<bool, ScriptError> {
    let key_count = decode_script_num(&pop(stack)?, 4)?;
    if !(0..=MAX_PUBKEYS_PER_MULTISIG).contains(&key_count) {
        return Err(ScriptError::InvalidOpcode(OP_CHECKMULTISIG));
    }
    let mut pubkeys = (0..key_count)
        .map(|_| pop(stack))
        .collect::<Result<Vec<_>, _>>()?;
    pubkeys.reverse();

    let sig_count = decode_script_num(&pop(stack)?, 4)?;
    if sig_count < 0 || sig_count > key_count {
        return Err(ScriptError::InvalidOpcode(OP_CHECKMULTISIG));
    }
    let mut sigs = (0..sig_count)
        .map(|_| pop(stack))
        .collect::<Result<Vec<_>, _>>()?;
    sigs.reverse();

    // CHECKMULTISIG pops one extra stack element.
    let dummy = pop(stack)?;
    if (flags & SCRIPT_VERIFY_NULLDUMMY) != 0 && !dummy.is_empty() {
        return Err(ScriptError::NullDummy);
    }

    let mut sig_index = 0usize;
    let mut key_index = 0usize;
    while sig_index < sigs.len() {
        if pubkeys.len() - key_index < sigs.len() - sig_index {
            return Ok(false);
        }
        if checker.check_sig(&sigs[sig_index], &pubkeys[key_index], script_code, flags)? {
            sig_index += 1;
        }
        key_index += 1;
    }
    Ok(true)
}

pub(crate) fn read_push(
    script: &[u8],
    cursor: &mut usize,
    opcode: u8,
) -> Result<Vec<u8>, ScriptError> {
    let len = match opcode {
        OP_0 => 0,
        0x01..=0x4b => usize::from(opcode),
        OP_PUSHDATA1 => usize::from(read_array::<1>(script, cursor)?[0]),
        OP_PUSHDATA2 => usize::from(u16::from_le_bytes(read_array::<2>(script, cursor)?)),
        OP_PUSHDATA4 => u32::from_le_bytes(read_array::<4>(script, cursor)?) as usize,
        _ => return Err(ScriptError::InvalidOpcode(opcode)),
    };
    let end = cursor.checked_add(len).ok_or(ScriptError::BadPush)?;
    let data = script.get(*cursor..end).ok_or(ScriptError::BadPush)?;
    *cursor = end;
    Ok(data.to_vec())
}

fn read_array<const N: usize>(script: &[u8], cursor: &mut usize) -> Result<[u8; N], ScriptError> {
    let bytes = script
        .get(*cursor..*cursor + N)
        .ok_or(ScriptError::BadPush)?;
    *cursor += N;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

pub fn is_push_only(script: &[u8]) -> bool {
    let mut cursor = 0usize;
    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        if opcode <= OP_PUSHDATA4 {
            if read_push(script, &mut cursor, opcode).is_err() {
                return false;
            }
        } else if !(opcode == OP_1NEGATE || (OP_1..=OP_16).contains(&opcode)) {
            return false;
        }
    }
    true
}

fn pop(stack: &mut Vec<Vec<u8>>) -> Result<Vec<u8>, ScriptError> {
    stack.pop().ok_or(ScriptError::StackUnderflow)
}

fn top_is_true(stack: &[Vec<u8>]) -> bool {
    stack.last().is_some_and(|top| cast_to_bool(top))
}

fn bool_to_vec(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}

fn cast_to_bool(data: &[u8]) -> bool {
    for (index, byte) in data.iter().enumerate() {
        if *byte != 0 {
            // Negative zero is false.
            return !(index == data.len() - 1 && *byte == 0x80);
        }
    }
    false
}

fn decode_script_num(data: &[u8], max_len: usize) -> Result<i64, ScriptError> {
    if data.len() > max_len {
        return Err(ScriptError::NumOverflow);
    }
    let Some(&last) = data.last() else {
        return Ok(0);
    };
    let mut result: i64 = 0;
    for (i, byte) in data.iter().enumerate() {
        result |= i64::from(*byte) << (8 * i);
    }
    if (last & 0x80) != 0 {
        result &= !(0x80i64 << (8 * (data.len() - 1)));
        result = -result;
    }
    Ok(result)
}

fn script_num_to_vec(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let mut abs = value.unsigned_abs();
    let mut result = Vec::new();
    while abs > 0 {
        result.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if let Some(last) = result.last_mut() {
        if (*last & 0x80) != 0 {
            result.push(if value < 0 { 0x80 } else { 0 });
        } else if value < 0 {
            *last |= 0x80;
        }
    }
    result
}

fn is_valid_pubkey(data: &[u8]) -> bool {
    match data.len() {
        33 => data[0] == 0x02 || data[0] == 0x03,
        65 => data[0] == 0x04,
        _ => false,
    }
}

fn is_minimal_push(data: &[u8], opcode: u8) -> bool {
    match data.len() {
        0 => opcode == OP_0,
        1 if (1..=16).contains(&data[0]) => false,
        1 if data[0] == 0x81 => false,
        len if len <= 75 => usize::from(opcode) == len,
        len if len <= 255 => opcode == OP_PUSHDATA1,
        len if len <= 65_535 => opcode == OP_PUSHDATA2,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AcceptAll;

    impl SignatureChecker for AcceptAll {
        fn check_sig(
            &self,
            sig: &[u8],
            _pubkey: &[u8],
            _script_code: &[u8],
            _flags: ScriptFlags,
        ) -> Result<bool, ScriptError> {
            Ok(!sig.is_empty())
        }

        fn check_lock_time(&self, _lock_time: i64) -> Result<(), ScriptError> {
            Ok(())
        }
    }

    #[test]
    fn script_numbers() {
        for value in [-255i64, -1, 0, 1, 127, 128, 255, 256, 70_000] {
            let bytes = script_num_to_vec(value);
            assert_eq!(decode_script_num(&bytes, 4), Ok(value));
        }
        assert!(!cast_to_bool(&[0x00, 0x80]));
        assert!(cast_to_bool(&[0x80, 0x00]));
    }

    #[test]
    fn p2sh_evaluates_redeem_script() {
        // Redeem script: OP_1 OP_EQUAL, satisfied by pushing 1.
        let redeem = vec![OP_1, OP_EQUAL];
        let mut script_pubkey = vec![OP_HASH160, 0x14];
        script_pubkey.extend_from_slice(&hash160(&redeem));
        script_pubkey.push(OP_EQUAL);

        let mut script_sig = vec![OP_1, redeem.len() as u8];
        script_sig.extend_from_slice(&redeem);
        assert_eq!(
            verify_script(&script_sig, &script_pubkey, SCRIPT_VERIFY_P2SH, &AcceptAll),
            Ok(())
        );

        let mut wrong = vec![OP_0, redeem.len() as u8];
        wrong.extend_from_slice(&redeem);
        assert_eq!(
            verify_script(&wrong, &script_pubkey, SCRIPT_VERIFY_P2SH, &AcceptAll),
            Err(ScriptError::EvalFalse)
        );
    }

    #[test]
    fn conditionals_and_op_return() {
        let script = [OP_0, OP_IF, OP_RETURN, OP_ELSE, OP_1, OP_ENDIF];
        assert_eq!(verify_script(&[], &script, 0, &AcceptAll), Ok(()));
        assert_eq!(
            verify_script(&[], &[OP_1, OP_IF, OP_1], 0, &AcceptAll),
            Err(ScriptError::UnbalancedConditional)
        );
        assert_eq!(
            verify_script(&[], &[OP_RETURN], 0, &AcceptAll),
            Err(ScriptError::OpReturn)
        );
    }

    #[test]
    fn multisig_needs_ordered_signatures() {
        // 1-of-2 with the dummy element.
        let script_pubkey = [OP_1, 0x01, 0xaa, 0x01, 0xbb, OP_1 + 1, OP_CHECKMULTISIG];
        let script_sig = [OP_0, 0x01, 0x01];
        assert_eq!(
            verify_script(&script_sig, &script_pubkey, SCRIPT_VERIFY_NULLDUMMY, &AcceptAll),
            Ok(())
        );
        let bad_dummy = [0x01, 0x07, 0x01, 0x01];
        assert_eq!(
            verify_script(&bad_dummy, &script_pubkey, SCRIPT_VERIFY_NULLDUMMY, &AcceptAll),
            Err(ScriptError::NullDummy)
        );
    }

    #[test]
    fn truncated_push_is_rejected() {
        assert_eq!(
            verify_script(&[0x05, 0x01], &[OP_1], 0, &AcceptAll),
            Err(ScriptError::BadPush)
        );
        assert!(!is_push_only(&[OP_DUP]));
        assert!(is_push_only(&[OP_0, OP_1NEGATE, 0x01, 0x02]));
    }
}
