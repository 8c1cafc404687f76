//! Signature operation counting for block and relay budgets.

use crate::interpreter::{
    read_push, OP_1, OP_16, OP_CHECKMULTISIG, OP_CHECKMULTISIGVERIFY, OP_CHECKSIG,
    OP_CHECKSIGVERIFY, OP_PUSHDATA4,
};
use crate::standard::is_p2sh;

const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// Counts sigops in `script`. With `accurate`, a multisig preceded by a
/// small integer counts that many keys instead of the maximum.
pub fn count_sigops(script: &[u8], accurate: bool) -> usize {
    let mut count = 0usize;
    let mut cursor = 0usize;
    let mut last_opcode = 0xffu8;
    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        if opcode <= OP_PUSHDATA4 {
            if read_push(script, &mut cursor, opcode).is_err() {
                break;
            }
        } else if opcode == OP_CHECKSIG || opcode == OP_CHECKSIGVERIFY {
            count += 1;
        } else if opcode == OP_CHECKMULTISIG || opcode == OP_CHECKMULTISIGVERIFY {
            if accurate && (OP_1..=OP_16).contains(&last_opcode) {
                count += usize::from(last_opcode - OP_1 + 1);
            } else {
                count += MAX_PUBKEYS_PER_MULTISIG;
            }
        }
        last_opcode = opcode;
    }
    count
}

/// Sigops of the redeem script a P2SH spend reveals as its last push.
pub fn p2sh_sigops(script_pubkey: &[u8], script_sig: &[u8]) -> usize {
    if !is_p2sh(script_pubkey) {
        return 0;
    }
    let mut cursor = 0usize;
    let mut last_push = Vec::new();
    while cursor < script_sig.len() {
        let opcode = script_sig[cursor];
        cursor += 1;
        if opcode > OP_16 {
            return 0;
        }
        if opcode <= OP_PUSHDATA4 {
            match read_push(script_sig, &mut cursor, opcode) {
                Ok(data) => last_push = data,
                Err(_) => return 0,
            }
        }
    }
    count_sigops(&last_push, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_and_accurate_multisig() {
        let script = [OP_1 + 1, OP_CHECKMULTISIG, OP_CHECKSIG];
        assert_eq!(count_sigops(&script, false), 21);
        assert_eq!(count_sigops(&script, true), 3);
    }

    #[test]
    fn p2sh_counts_redeem_script() {
        let redeem = [OP_CHECKSIG, OP_CHECKSIG];
        let mut script_pubkey = vec![0xa9, 0x14];
        script_pubkey.extend_from_slice(&[0u8; 20]);
        script_pubkey.push(0x87);
        let script_sig = [0x02, redeem[0], redeem[1]];
        assert_eq!(p2sh_sigops(&script_pubkey, &script_sig), 2);
        assert_eq!(p2sh_sigops(&[0x51], &script_sig), 0);
    }
}
