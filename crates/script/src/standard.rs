//! Standard script classification utilities.

use crate::interpreter::{
    read_push, OP_1, OP_16, OP_CHECKMULTISIG, OP_CHECKSIG, OP_DUP, OP_EQUAL, OP_EQUALVERIFY,
    OP_HASH160, OP_PUSHDATA4, OP_RETURN,
};

/// Largest OP_RETURN output relayed by default.
pub const MAX_OP_RETURN_RELAY: usize = 83;
/// Largest scriptSig relayed by default.
pub const MAX_STANDARD_SCRIPT_SIG_SIZE: usize = 1_650;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptType {
    P2Pk,
    P2Pkh,
    P2Sh,
    MultiSig,
    NullData,
    Unknown,
}

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    if is_p2pkh(script) {
        ScriptType::P2Pkh
    } else if is_p2sh(script) {
        ScriptType::P2Sh
    } else if is_p2pk(script) {
        ScriptType::P2Pk
    } else if is_null_data(script) {
        ScriptType::NullData
    } else if multisig_shape(script).is_some() {
        ScriptType::MultiSig
    } else {
        ScriptType::Unknown
    }
}

pub fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

pub fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

fn is_p2pk(script: &[u8]) -> bool {
    match script.first().copied() {
        Some(len @ (33 | 65)) => {
            script.len() == usize::from(len) + 2 && script[script.len() - 1] == OP_CHECKSIG
        }
        _ => false,
    }
}

/// OP_RETURN followed only by pushes, within the relay size limit.
fn is_null_data(script: &[u8]) -> bool {
    if script.first() != Some(&OP_RETURN) || script.len() > MAX_OP_RETURN_RELAY {
        return false;
    }
    let mut cursor = 1usize;
    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        if opcode > OP_16 {
            return false;
        }
        if opcode <= OP_PUSHDATA4 && read_push(script, &mut cursor, opcode).is_err() {
            return false;
        }
    }
    true
}

/// `(required, keys)` of a bare `m <keys> n OP_CHECKMULTISIG` script.
fn multisig_shape(script: &[u8]) -> Option<(u8, u8)> {
    let (&last, body) = script.split_last()?;
    if last != OP_CHECKMULTISIG || body.len() < 2 {
        return None;
    }
    let required = small_int(body[0])?;
    let keys = small_int(body[body.len() - 1])?;
    if required == 0 || required > keys || keys > 3 {
        return None;
    }
    let mut cursor = 1usize;
    let mut seen = 0u8;
    while cursor < body.len() - 1 {
        let opcode = body[cursor];
        cursor += 1;
        let key = read_push(body, &mut cursor, opcode).ok()?;
        if key.len() != 33 && key.len() != 65 {
            return None;
        }
        seen += 1;
    }
    (seen == keys).then_some((required, keys))
}

fn small_int(opcode: u8) -> Option<u8> {
    (OP_1..=OP_16).contains(&opcode).then(|| opcode - OP_1 + 1)
}

pub fn is_standard_script_pubkey(script: &[u8]) -> bool {
    classify_script_pubkey(script) != ScriptType::Unknown
}

pub fn is_standard_script_sig(script_sig: &[u8]) -> bool {
    script_sig.len() <= MAX_STANDARD_SCRIPT_SIG_SIZE
        && crate::interpreter::is_push_only(script_sig)
}
