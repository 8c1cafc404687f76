//! Stateless and contextual block, transaction and certificate checks.
//!
//! Stages run in order and each is a hard gate: [`check_block_header`]
//! (version, proof of work), [`check_block`] (structure, self-contained
//! transaction rules), then [`contextual_check_block_header`] and
//! [`contextual_check_block`] against the parent. The full connect check
//! lives in `connect`.

use std::collections::{HashMap, HashSet};

use zend_consensus::constants::{
    BLOCK_TX_PARTITION_SIZE, BLOCK_VERSION_SC_SUPPORT, GROTH_TX_VERSION, LOCKTIME_THRESHOLD,
    MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE, MAX_BLOCK_SIZE_BEFORE_SC, MAX_CERT_SIZE,
    MAX_COINBASE_SCRIPT_SIG, MAX_FUTURE_BLOCK_TIME, MAX_SC_CUSTOM_DATA_LEN,
    MAX_SC_PROOF_SIZE, MAX_SC_WITHDRAWAL_EPOCH_LENGTH, MAX_TX_SIZE, MEDIAN_TIME_SPAN,
    MIN_BLOCK_VERSION, MIN_COINBASE_SCRIPT_SIG, MIN_SC_WITHDRAWAL_EPOCH_LENGTH,
    PHGR_TX_VERSION, SC_CERT_VERSION, SC_TX_VERSION, TRANSPARENT_TX_VERSION,
};
use zend_consensus::money::{money_range, Amount, MAX_MONEY};
use zend_consensus::{community_fund_amount, community_fund_script, ConsensusParams, Hash256};
use zend_pow::validation::{validate_pow_header, PowError};
use zend_pow::get_next_work_required;
use zend_primitives::transaction::SEQUENCE_FINAL;
use zend_primitives::{Block, BlockHeader, ScCertificate, Transaction, TxIn, TxOut};
use zend_script::sigops::count_sigops;

use crate::blockindex::{BlockIndexTree, NodeId};
use crate::error::RejectReason;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ValidationFlags {
    pub check_pow: bool,
    pub check_scripts: bool,
    pub check_proofs: bool,
}

impl Default for ValidationFlags {
    fn default() -> Self {
        Self {
            check_pow: true,
            check_scripts: true,
            check_proofs: true,
        }
    }
}

impl ValidationFlags {
    /// Regtest helpers mine without solving equihash.
    pub fn without_pow() -> Self {
        Self {
            check_pow: false,
            ..Self::default()
        }
    }
}

pub fn check_block_header(
    header: &BlockHeader,
    params: &ConsensusParams,
    flags: &ValidationFlags,
) -> Result<(), RejectReason> {
    if header.version < MIN_BLOCK_VERSION {
        return Err(RejectReason::invalid(100, "bad-version"));
    }
    if flags.check_pow {
        validate_pow_header(header, params).map_err(|err| match err {
            PowError::Equihash(_) => RejectReason::invalid(100, "invalid-solution"),
            PowError::HashMismatch => RejectReason::invalid(50, "high-hash"),
            PowError::InvalidBits(_) | PowError::Compact(_) => {
                RejectReason::invalid(50, "bad-diffbits")
            }
        })?;
    }
    Ok(())
}

/// Structural checks that need nothing but the block itself.
pub fn check_block(
    block: &Block,
    params: &ConsensusParams,
    flags: &ValidationFlags,
) -> Result<(), RejectReason> {
    check_block_header(&block.header, params, flags)?;

    let (root, mutated) = block.compute_merkle_root();
    if root != block.header.merkle_root {
        return Err(RejectReason::invalid(100, "bad-txnmrklroot"));
    }
    if mutated {
        return Err(RejectReason::invalid(100, "bad-txns-duplicate"));
    }

    let supports_certificates = block.header.supports_certificates();
    let size_limit = if supports_certificates {
        MAX_BLOCK_SIZE
    } else {
        MAX_BLOCK_SIZE_BEFORE_SC
    };
    if block.transactions.is_empty() || block.serialized_size() as u64 > u64::from(size_limit) {
        return Err(RejectReason::invalid(100, "bad-blk-length"));
    }
    if supports_certificates {
        let tx_bytes: usize = block.transactions.iter().map(Transaction::serialized_size).sum();
        if tx_bytes as u64 > u64::from(BLOCK_TX_PARTITION_SIZE) {
            return Err(RejectReason::invalid(100, "bad-blk-tx-partition"));
        }
    } else {
        if !block.certificates.is_empty() {
            return Err(RejectReason::invalid(100, "bad-blk-certs-not-supported"));
        }
        if block.header.sc_txs_commitment != [0u8; 32] {
            return Err(RejectReason::invalid(100, "bad-sc-txs-commitment"));
        }
    }

    if !block.transactions[0].is_coinbase() {
        return Err(RejectReason::invalid(100, "bad-cb-missing"));
    }
    if block.transactions[1..].iter().any(Transaction::is_coinbase) {
        return Err(RejectReason::invalid(100, "bad-cb-multiple"));
    }

    let mut last_cert: HashMap<Hash256, (i32, i64)> = HashMap::new();
    for cert in &block.certificates {
        let key = (cert.epoch_number, cert.quality);
        if let Some(previous) = last_cert.insert(cert.sc_id, key) {
            if key < previous {
                return Err(RejectReason::invalid(100, "bad-cert-order"));
            }
        }
    }

    let mut seen = HashSet::with_capacity(block.transactions.len() + block.certificates.len());
    for tx in &block.transactions {
        check_transaction(tx)?;
        if !seen.insert(tx.txid()) {
            return Err(RejectReason::invalid(100, "bad-txns-duplicate"));
        }
    }
    for cert in &block.certificates {
        check_certificate(cert)?;
        if !seen.insert(cert.hash()) {
            return Err(RejectReason::invalid(100, "bad-txns-duplicate"));
        }
    }

    if block_legacy_sigops(block) > MAX_BLOCK_SIGOPS {
        return Err(RejectReason::invalid(100, "bad-blk-sigops"));
    }
    Ok(())
}

fn check_outputs(outputs: &[TxOut], prefix: &str) -> Result<Amount, RejectReason> {
    let mut total: Amount = 0;
    for out in outputs {
        if out.value < 0 {
            return Err(RejectReason::invalid(100, format!("{prefix}-vout-negative")));
        }
        if out.value > MAX_MONEY {
            return Err(RejectReason::invalid(100, format!("{prefix}-vout-toolarge")));
        }
        total = total
            .checked_add(out.value)
            .filter(|total| money_range(*total))
            .ok_or_else(|| RejectReason::invalid(100, format!("{prefix}-txouttotal-toolarge")))?;
    }
    Ok(total)
}

fn check_inputs_unique(inputs: &[TxIn], prefix: &str) -> Result<(), RejectReason> {
    let mut seen = HashSet::with_capacity(inputs.len());
    for input in inputs {
        if !seen.insert(&input.prevout) {
            return Err(RejectReason::invalid(100, format!("{prefix}-inputs-duplicate")));
        }
    }
    Ok(())
}

/// Self-contained transaction rules.
pub fn check_transaction(tx: &Transaction) -> Result<(), RejectReason> {
    let known_version = matches!(
        tx.version,
        TRANSPARENT_TX_VERSION | PHGR_TX_VERSION | GROTH_TX_VERSION | SC_TX_VERSION
    );
    if !known_version {
        return Err(RejectReason::invalid(100, "bad-txns-version"));
    }
    let has_sc_fields =
        !tx.vsc_ccout.is_empty() || !tx.vft_ccout.is_empty() || !tx.vcsw_ccin.is_empty();
    if has_sc_fields && !tx.is_sc_version() {
        return Err(RejectReason::invalid(100, "bad-txns-sc-fields-not-supported"));
    }
    if !tx.join_splits.is_empty() && !tx.supports_join_splits() {
        return Err(RejectReason::invalid(100, "bad-txns-joinsplit-not-supported"));
    }

    if tx.vin.is_empty() && tx.join_splits.is_empty() && tx.vcsw_ccin.is_empty() {
        return Err(RejectReason::invalid(10, "bad-txns-vin-empty"));
    }
    if tx.vout.is_empty()
        && tx.join_splits.is_empty()
        && tx.vsc_ccout.is_empty()
        && tx.vft_ccout.is_empty()
    {
        return Err(RejectReason::invalid(10, "bad-txns-vout-empty"));
    }
    if tx.serialized_size() as u64 > u64::from(MAX_TX_SIZE) {
        return Err(RejectReason::invalid(100, "bad-txns-oversize"));
    }

    check_outputs(&tx.vout, "bad-txns")?;

    for creation in &tx.vsc_ccout {
        if !(MIN_SC_WITHDRAWAL_EPOCH_LENGTH..=MAX_SC_WITHDRAWAL_EPOCH_LENGTH)
            .contains(&creation.withdrawal_epoch_length)
        {
            return Err(RejectReason::invalid(100, "bad-sc-creation-epoch"));
        }
        if creation.custom_data.len() > MAX_SC_CUSTOM_DATA_LEN {
            return Err(RejectReason::invalid(100, "bad-sc-creation-custom-data"));
        }
        if creation.value <= 0 || !money_range(creation.value) {
            return Err(RejectReason::invalid(100, "bad-sc-creation-amount"));
        }
    }
    for ft in &tx.vft_ccout {
        if ft.value <= 0 || !money_range(ft.value) {
            return Err(RejectReason::invalid(100, "bad-sc-ft-amount"));
        }
    }
    let mut csw_nullifiers = HashSet::with_capacity(tx.vcsw_ccin.len());
    for csw in &tx.vcsw_ccin {
        if csw.value <= 0 || !money_range(csw.value) {
            return Err(RejectReason::invalid(100, "bad-sc-csw-amount"));
        }
        if csw.proof.len() > MAX_SC_PROOF_SIZE {
            return Err(RejectReason::invalid(100, "bad-sc-csw-proof-size"));
        }
        if !csw_nullifiers.insert((csw.sc_id, csw.nullifier)) {
            return Err(RejectReason::invalid(100, "bad-sc-csw-nullifiers-duplicate"));
        }
    }

    for js in &tx.join_splits {
        if js.vpub_old < 0 || js.vpub_new < 0 {
            return Err(RejectReason::invalid(100, "bad-txns-vpub-negative"));
        }
        if js.vpub_old > MAX_MONEY || js.vpub_new > MAX_MONEY {
            return Err(RejectReason::invalid(100, "bad-txns-vpub-toolarge"));
        }
        if js.vpub_old != 0 && js.vpub_new != 0 {
            return Err(RejectReason::invalid(100, "bad-txns-vpubs-both-nonzero"));
        }
    }
    if !tx.value_out().is_some_and(money_range) {
        return Err(RejectReason::invalid(100, "bad-txns-txouttotal-toolarge"));
    }
    if !tx.value_in_without_inputs().is_some_and(money_range) {
        return Err(RejectReason::invalid(100, "bad-txns-txintotal-toolarge"));
    }

    check_inputs_unique(&tx.vin, "bad-txns")?;
    let mut nullifiers = HashSet::new();
    if !tx.nullifiers().all(|nullifier| nullifiers.insert(*nullifier)) {
        return Err(RejectReason::invalid(100, "bad-joinsplits-nullifiers-duplicate"));
    }

    if tx.is_coinbase() {
        if !tx.join_splits.is_empty() {
            return Err(RejectReason::invalid(100, "bad-cb-has-joinsplits"));
        }
        if has_sc_fields {
            return Err(RejectReason::invalid(100, "bad-cb-has-sc-outputs"));
        }
        let len = tx.vin[0].script_sig.len();
        if !(MIN_COINBASE_SCRIPT_SIG..=MAX_COINBASE_SCRIPT_SIG).contains(&len) {
            return Err(RejectReason::invalid(100, "bad-cb-length"));
        }
    } else if tx.vin.iter().any(|input| input.prevout.is_null()) {
        return Err(RejectReason::invalid(10, "bad-txns-prevout-null"));
    }
    Ok(())
}

/// Self-contained certificate rules.
pub fn check_certificate(cert: &ScCertificate) -> Result<(), RejectReason> {
    if cert.version != SC_CERT_VERSION {
        return Err(RejectReason::invalid(100, "bad-cert-version"));
    }
    if cert.epoch_number < 0 {
        return Err(RejectReason::invalid(100, "bad-cert-epoch"));
    }
    if cert.quality < 0 {
        return Err(RejectReason::invalid(100, "bad-cert-quality"));
    }
    if cert.serialized_size() as u64 > u64::from(MAX_CERT_SIZE) {
        return Err(RejectReason::invalid(100, "bad-cert-oversize"));
    }
    if cert.sc_proof.len() > MAX_SC_PROOF_SIZE {
        return Err(RejectReason::invalid(100, "bad-cert-proof-size"));
    }
    let change = check_outputs(&cert.vout, "bad-cert")?;
    let bwt = cert
        .bwt_total()
        .filter(|total| money_range(*total))
        .ok_or_else(|| RejectReason::invalid(100, "bad-cert-bwt-toolarge"))?;
    if cert.backward_transfers.iter().any(|bt| bt.amount < 0) {
        return Err(RejectReason::invalid(100, "bad-cert-bwt-negative"));
    }
    if !change.checked_add(bwt).is_some_and(money_range) {
        return Err(RejectReason::invalid(100, "bad-cert-txouttotal-toolarge"));
    }
    if cert.vin.is_empty() && !cert.vout.is_empty() {
        return Err(RejectReason::invalid(100, "bad-cert-change-without-inputs"));
    }
    check_inputs_unique(&cert.vin, "bad-cert")?;
    if cert.vin.iter().any(|input| input.prevout.is_null()) {
        return Err(RejectReason::invalid(10, "bad-cert-prevout-null"));
    }
    Ok(())
}

/// Header rules that need the parent: difficulty, timestamps, version.
pub fn contextual_check_block_header(
    header: &BlockHeader,
    tree: &BlockIndexTree,
    prev: NodeId,
    params: &ConsensusParams,
    now: i64,
) -> Result<(), RejectReason> {
    let height = tree.node(prev).height + 1;
    let window = params.digishield_averaging_window.max(0) as usize + MEDIAN_TIME_SPAN + 1;
    let history = tree.header_window(prev, window);
    let expected = get_next_work_required(&history, Some(i64::from(header.time)), params)
        .map_err(|_| RejectReason::invalid(100, "bad-diffbits"))?;
    if header.bits != expected {
        return Err(RejectReason::invalid(100, "bad-diffbits"));
    }

    let time = i64::from(header.time);
    if time <= tree.median_time_past(prev) {
        return Err(RejectReason::invalid(0, "time-too-old"));
    }
    if time > now + MAX_FUTURE_BLOCK_TIME {
        return Err(RejectReason::invalid(0, "time-too-new"));
    }

    if params.sc_enabled_at(height) && header.version != BLOCK_VERSION_SC_SUPPORT {
        return Err(RejectReason::invalid(0, "bad-version").with_code(crate::error::REJECT_OBSOLETE));
    }
    Ok(())
}

/// Block rules that need the height: finality, coinbase height and the
/// community fund output.
pub fn contextual_check_block(
    block: &Block,
    height: i32,
    params: &ConsensusParams,
) -> Result<(), RejectReason> {
    let block_time = i64::from(block.header.time);
    for tx in &block.transactions {
        if !is_final_tx(tx, height, block_time) {
            return Err(RejectReason::invalid(10, "bad-txns-nonfinal"));
        }
    }

    if !params.sc_enabled_at(height) {
        let has_sc = !block.certificates.is_empty()
            || block.transactions.iter().any(Transaction::is_sc_version);
        if has_sc {
            return Err(RejectReason::invalid(100, "bad-tx-sc-not-active"));
        }
    }

    let coinbase = &block.transactions[0];
    let expected = coinbase_height_script(height);
    if !coinbase.vin[0].script_sig.starts_with(&expected) {
        return Err(RejectReason::invalid(100, "bad-cb-height"));
    }

    let fund = community_fund_amount(height, params);
    if fund > 0 {
        let script = community_fund_script(params);
        let paid = coinbase
            .vout
            .iter()
            .any(|out| out.script_pubkey == script && out.value == fund);
        if !paid {
            return Err(RejectReason::invalid(100, "cb-no-community-fund"));
        }
    }
    Ok(())
}

pub fn is_final_tx(tx: &Transaction, height: i32, block_time: i64) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let lock_time = i64::from(tx.lock_time);
    let compare = if tx.lock_time < LOCKTIME_THRESHOLD {
        i64::from(height)
    } else {
        block_time
    };
    if lock_time < compare {
        return true;
    }
    tx.vin.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// Signature operations counted without looking at spent outputs.
pub fn legacy_sigops(inputs: &[TxIn], outputs: &[TxOut]) -> u32 {
    let input_ops: usize = inputs
        .iter()
        .map(|input| count_sigops(&input.script_sig, false))
        .sum();
    let output_ops: usize = outputs
        .iter()
        .map(|output| count_sigops(&output.script_pubkey, false))
        .sum();
    (input_ops + output_ops).min(u32::MAX as usize) as u32
}

fn block_legacy_sigops(block: &Block) -> u32 {
    let txs = block
        .transactions
        .iter()
        .map(|tx| legacy_sigops(&tx.vin, &tx.vout));
    let certs = block
        .certificates
        .iter()
        .map(|cert| legacy_sigops(&cert.vin, &cert.vout));
    txs.chain(certs).fold(0u32, u32::saturating_add)
}

/// Script prefix the coinbase of a block at `height` must start with.
pub fn coinbase_height_script(height: i32) -> Vec<u8> {
    script_push_int(i64::from(height))
}

fn script_push_int(value: i64) -> Vec<u8> {
    const OP_0: u8 = 0x00;
    const OP_1NEGATE: u8 = 0x4f;
    const OP_1: u8 = 0x51;
    if value == 0 {
        return vec![OP_0];
    }
    if value == -1 {
        return vec![OP_1NEGATE];
    }
    if (1..=16).contains(&value) {
        return vec![OP_1 + (value as u8 - 1)];
    }
    let data = script_num_to_vec(value);
    let mut script = Vec::new();
    push_data(&mut script, &data);
    script
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
    let sign_bit = 0x80u8;
    if let Some(last) = result.last_mut() {
        if (*last & sign_bit) != 0 {
            result.push(if value < 0 { sign_bit } else { 0 });
        } else if value < 0 {
            *last |= sign_bit;
        }
    }
    result
}

fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    const OP_PUSHDATA1: u8 = 0x4c;
    const OP_PUSHDATA2: u8 = 0x4d;

    if data.len() < OP_PUSHDATA1 as usize {
        script.push(data.len() as u8);
    } else if data.len() <= u8::MAX as usize {
        script.push(OP_PUSHDATA1);
        script.push(data.len() as u8);
    } else {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(data.len() as u16).to_le_bytes());
    }
    script.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use zend_consensus::{consensus_params, Network};
    use zend_primitives::certificate::BackwardTransfer;
    use zend_primitives::transaction::ScCreationOutput;
    use zend_primitives::OutPoint;

    fn spend(prev: u8, value: Amount) -> Transaction {
        Transaction {
            version: TRANSPARENT_TX_VERSION,
            vin: vec![TxIn {
                prevout: OutPoint::new([prev; 32], 0),
                script_sig: vec![0x51],
                sequence: SEQUENCE_FINAL,
            }],
            vout: vec![TxOut {
                value,
                script_pubkey: vec![0x51],
            }],
            vcsw_ccin: Vec::new(),
            vsc_ccout: Vec::new(),
            vft_ccout: Vec::new(),
            lock_time: 0,
            join_splits: Vec::new(),
        }
    }

    fn coinbase(height: i32, params: &ConsensusParams) -> Transaction {
        let mut script_sig = coinbase_height_script(height);
        script_sig.push(0x00);
        let mut vout = vec![TxOut {
            value: 1,
            script_pubkey: vec![0x51],
        }];
        let fund = community_fund_amount(height, params);
        if fund > 0 {
            vout.push(TxOut {
                value: fund,
                script_pubkey: community_fund_script(params),
            });
        }
        Transaction {
            vin: vec![TxIn {
                prevout: OutPoint::null(),
                script_sig,
                sequence: SEQUENCE_FINAL,
            }],
            vout,
            ..spend(0, 0)
        }
    }

    fn block(transactions: Vec<Transaction>) -> Block {
        let mut block = Block {
            header: BlockHeader {
                version: BLOCK_VERSION_SC_SUPPORT,
                prev_block: [0u8; 32],
                merkle_root: [0u8; 32],
                sc_txs_commitment: [0u8; 32],
                time: 1_600_000_000,
                bits: 0x200f_0f0f,
                nonce: [0u8; 32],
                solution: Vec::new(),
            },
            transactions,
            certificates: Vec::new(),
        };
        block.header.merkle_root = block.compute_merkle_root().0;
        block
    }

    fn reason(result: Result<(), RejectReason>) -> Option<String> {
        result.err().map(|reason| reason.reason)
    }

    #[test]
    fn script_number_encoding() {
        assert_eq!(coinbase_height_script(0), vec![0x00]);
        assert_eq!(coinbase_height_script(16), vec![0x60]);
        assert_eq!(coinbase_height_script(17), vec![0x01, 17]);
        assert_eq!(coinbase_height_script(128), vec![0x02, 0x80, 0x00]);
        assert_eq!(coinbase_height_script(1_000_000), vec![0x03, 0x40, 0x42, 0x0f]);
        assert_eq!(script_num_to_vec(-1), vec![0x81]);
    }

    #[test]
    fn transaction_shape_rules() {
        assert_eq!(reason(check_transaction(&spend(1, 5))), None);

        let mut negative = spend(1, -1);
        assert_eq!(reason(check_transaction(&negative)).as_deref(), Some("bad-txns-vout-negative"));
        negative.vout[0].value = MAX_MONEY + 1;
        assert_eq!(reason(check_transaction(&negative)).as_deref(), Some("bad-txns-vout-toolarge"));

        let mut duplicate = spend(1, 5);
        duplicate.vin.push(duplicate.vin[0].clone());
        assert_eq!(
            reason(check_transaction(&duplicate)).as_deref(),
            Some("bad-txns-inputs-duplicate")
        );

        let mut empty = spend(1, 5);
        empty.vin.clear();
        assert_eq!(reason(check_transaction(&empty)).as_deref(), Some("bad-txns-vin-empty"));

        let mut creation = spend(1, 5);
        creation.vsc_ccout.push(ScCreationOutput {
            withdrawal_epoch_length: 10,
            value: 10,
            address: [0u8; 32],
            custom_data: Vec::new(),
            wcert_vk: Vec::new(),
        });
        assert_eq!(
            reason(check_transaction(&creation)).as_deref(),
            Some("bad-txns-sc-fields-not-supported")
        );
        creation.version = SC_TX_VERSION;
        assert_eq!(reason(check_transaction(&creation)), None);
        creation.vsc_ccout[0].withdrawal_epoch_length = 1;
        assert_eq!(reason(check_transaction(&creation)).as_deref(), Some("bad-sc-creation-epoch"));
    }

    #[test]
    fn certificate_shape_rules() {
        let mut cert = ScCertificate {
            version: SC_CERT_VERSION,
            sc_id: [1u8; 32],
            epoch_number: 0,
            quality: 3,
            end_epoch_block_hash: [0u8; 32],
            sc_proof: Vec::new(),
            vin: Vec::new(),
            vout: Vec::new(),
            backward_transfers: vec![BackwardTransfer {
                amount: 10,
                pub_key_hash: [2u8; 20],
            }],
        };
        assert_eq!(reason(check_certificate(&cert)), None);
        cert.backward_transfers[0].amount = -1;
        assert!(check_certificate(&cert).is_err());
        cert.backward_transfers[0].amount = 1;
        cert.version = SC_TX_VERSION;
        assert_eq!(reason(check_certificate(&cert)).as_deref(), Some("bad-cert-version"));
    }

    #[test]
    fn block_structure_rules() {
        let params = consensus_params(Network::Regtest);
        let flags = ValidationFlags::without_pow();

        let good = block(vec![coinbase(1, &params), spend(1, 5)]);
        assert_eq!(reason(check_block(&good, &params, &flags)), None);

        let mut bad_root = good.clone();
        bad_root.header.merkle_root = [9u8; 32];
        let err = check_block(&bad_root, &params, &flags).err();
        assert_eq!(err.as_ref().map(|r| r.reason.as_str()), Some("bad-txnmrklroot"));
        assert!(err.is_some_and(|r| r.corruption_possible()));

        let missing = block(vec![spend(1, 5)]);
        assert_eq!(reason(check_block(&missing, &params, &flags)).as_deref(), Some("bad-cb-missing"));

        let multiple = block(vec![coinbase(1, &params), coinbase(2, &params)]);
        assert_eq!(reason(check_block(&multiple, &params, &flags)).as_deref(), Some("bad-cb-multiple"));

        let mut old = good.clone();
        old.header.version = 2;
        assert_eq!(reason(check_block(&old, &params, &flags)).as_deref(), Some("bad-version"));
    }

    #[test]
    fn certificates_in_a_block_are_ordered() {
        let params = consensus_params(Network::Regtest);
        let flags = ValidationFlags::without_pow();
        let cert = |quality| ScCertificate {
            version: SC_CERT_VERSION,
            sc_id: [1u8; 32],
            epoch_number: 0,
            quality,
            end_epoch_block_hash: [0u8; 32],
            sc_proof: Vec::new(),
            vin: Vec::new(),
            vout: Vec::new(),
            backward_transfers: Vec::new(),
        };
        let mut ordered = block(vec![coinbase(1, &params)]);
        ordered.certificates = vec![cert(1), cert(2)];
        ordered.header.merkle_root = ordered.compute_merkle_root().0;
        assert_eq!(reason(check_block(&ordered, &params, &flags)), None);

        ordered.certificates.reverse();
        ordered.header.merkle_root = ordered.compute_merkle_root().0;
        assert_eq!(reason(check_block(&ordered, &params, &flags)).as_deref(), Some("bad-cert-order"));
    }

    #[test]
    fn contextual_block_rules() {
        let params = consensus_params(Network::Regtest);
        let good = block(vec![coinbase(5, &params)]);
        assert_eq!(reason(contextual_check_block(&good, 5, &params)), None);
        assert_eq!(
            reason(contextual_check_block(&good, 6, &params)).as_deref(),
            Some("bad-cb-height")
        );

        let mut unpaid = good.clone();
        unpaid.transactions[0].vout.truncate(1);
        assert_eq!(
            reason(contextual_check_block(&unpaid, 5, &params)).as_deref(),
            Some("cb-no-community-fund")
        );

        let mut locked = block(vec![coinbase(5, &params), spend(1, 1)]);
        locked.transactions[1].lock_time = 10;
        locked.transactions[1].vin[0].sequence = 0;
        assert_eq!(
            reason(contextual_check_block(&locked, 5, &params)).as_deref(),
            Some("bad-txns-nonfinal")
        );
        assert_eq!(reason(contextual_check_block(&locked, 11, &params)).as_deref(), Some("bad-cb-height"));
    }

    #[test]
    fn finality() {
        let mut tx = spend(1, 1);
        tx.lock_time = 100;
        tx.vin[0].sequence = 0;
        assert!(!is_final_tx(&tx, 100, 0));
        assert!(is_final_tx(&tx, 101, 0));
        tx.vin[0].sequence = SEQUENCE_FINAL;
        assert!(is_final_tx(&tx, 100, 0));
        tx.lock_time = LOCKTIME_THRESHOLD + 10;
        tx.vin[0].sequence = 0;
        assert!(is_final_tx(&tx, 1, i64::from(LOCKTIME_THRESHOLD) + 11));
    }
}
