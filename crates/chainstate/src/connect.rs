//! Full connect check: applies a block to a coin view and records its undo.
//!
//! The view passed in must be a scratch child of the tip view. Every check
//! here may fail after the view was already mutated; the caller drops the
//! view and the partial undo in that case.

use std::time::Instant;

use zend_consensus::constants::MAX_BLOCK_SIGOPS;
use zend_consensus::money::{checked_money_add, money_range, Amount};
use zend_consensus::{block_subsidy, hash256_to_hex, ConsensusParams, Hash256};
use zend_log::{log_cat, log_warn, Category};
use zend_primitives::{Block, TxBase, TxIn, TxLike};
use zend_script::sigops::p2sh_sigops;
use zend_script::BLOCK_SCRIPT_VERIFY_FLAGS;

use crate::chain::ActiveChain;
use crate::checkqueue::{CheckQueue, ScriptCheck};
use crate::coins::{CoinRecord, OutputMaturity};
use crate::commitment::sc_txs_commitment;
use crate::error::{ChainStateError, RejectReason};
use crate::ledger;
use crate::proof::{ProofContext, ProofVerifier};
use crate::tree::{append_commitment, empty_root, empty_tree, tree_root, NoteTree};
use crate::undo::{BlockUndo, CertUndo, SpentCoin, TxUndo};
use crate::validation::{legacy_sigops, ValidationFlags};
use crate::view::{CoinSource, CoinView};

pub struct ConnectContext<'a> {
    pub height: i32,
    pub block_hash: Hash256,
    /// Active chain ending at the parent of the block.
    pub chain: &'a ActiveChain,
    pub params: &'a ConsensusParams,
    pub flags: ValidationFlags,
    pub checks: &'a CheckQueue,
    pub verifier: &'a dyn ProofVerifier,
}

struct SpendOutcome {
    spent: Vec<SpentCoin>,
    value_in: Amount,
    p2sh_sigops: u32,
}

/// Spends every input of one entry, enforcing availability and maturity,
/// and queues its script checks.
fn spend_inputs<'e>(
    view: &mut CoinView<'_>,
    entry: &'e TxBase,
    entry_id: Hash256,
    height: i32,
    flags: &ValidationFlags,
    checks: &mut Vec<ScriptCheck<'e>>,
) -> Result<SpendOutcome, ChainStateError> {
    let inputs = entry.inputs();
    let mut outcome = SpendOutcome {
        spent: Vec::with_capacity(inputs.len()),
        value_in: 0,
        p2sh_sigops: 0,
    };
    for (index, input) in inputs.iter().enumerate() {
        let prevout = &input.prevout;
        let maturity = match view.access_coins(&prevout.hash)? {
            Some(record) => (
                record.output_maturity(prevout.index, height),
                record.meta.is_coinbase,
            ),
            None => (OutputMaturity::Unavailable, false),
        };
        match maturity {
            (OutputMaturity::Unavailable, _) => {
                return Err(RejectReason::invalid(100, "bad-txns-inputs-missingorspent").into());
            }
            (OutputMaturity::Immature, true) => {
                return Err(RejectReason::invalid(0, "premature-spend-of-coinbase").into());
            }
            (OutputMaturity::Immature, false) => {
                return Err(RejectReason::invalid(0, "premature-spend-of-certificate").into());
            }
            (OutputMaturity::Mature, _) => {}
        }
        let Some((meta, out)) = view.spend_coin(&prevout.hash, prevout.index)? else {
            return Err(RejectReason::invalid(100, "bad-txns-inputs-missingorspent").into());
        };
        outcome.value_in = checked_money_add(outcome.value_in, out.value)
            .ok_or_else(|| RejectReason::invalid(100, "bad-txns-inputvalues-outofrange"))?;
        outcome.p2sh_sigops = outcome
            .p2sh_sigops
            .saturating_add(p2sh_sigops(&out.script_pubkey, &input.script_sig) as u32);
        if flags.check_scripts {
            checks.push(ScriptCheck {
                entry,
                entry_id,
                input_index: index,
                script_pubkey: out.script_pubkey.clone(),
                flags: BLOCK_SCRIPT_VERIFY_FLAGS,
            });
        }
        outcome.spent.push(SpentCoin { meta, out });
    }
    Ok(outcome)
}

fn restore_inputs(
    view: &mut CoinView<'_>,
    inputs: &[TxIn],
    spent: &[SpentCoin],
) -> Result<(), ChainStateError> {
    if inputs.len() != spent.len() {
        return Err(ChainStateError::Corrupt("undo input count mismatch"));
    }
    for (input, coin) in inputs.iter().zip(spent).rev() {
        let record = view.modify_coins(&input.prevout.hash, || CoinRecord::empty(coin.meta))?;
        if !record.restore(input.prevout.index, coin.out.clone()) {
            return Err(ChainStateError::Corrupt("spent output already present"));
        }
    }
    Ok(())
}

fn put_coins(
    view: &mut CoinView<'_>,
    id: &Hash256,
    record: CoinRecord,
) -> Result<(), ChainStateError> {
    let slot = view.modify_coins(id, || CoinRecord::empty(record.meta))?;
    *slot = record;
    Ok(())
}

fn start_tree(view: &mut CoinView<'_>, anchor: &Hash256) -> Result<NoteTree, ChainStateError> {
    if *anchor == empty_root() {
        return Ok(empty_tree());
    }
    view.anchor(anchor)?
        .ok_or(ChainStateError::Corrupt("best anchor tree missing"))
}

/// Applies `block` on top of `view`, returning the undo record.
pub fn connect_block(
    view: &mut CoinView<'_>,
    block: &Block,
    ctx: &ConnectContext<'_>,
) -> Result<BlockUndo, ChainStateError> {
    let started = Instant::now();
    let height = ctx.height;
    let expected_prev = (height > 0).then_some(block.header.prev_block);
    if view.best_block()? != expected_prev {
        return Err(ChainStateError::Corrupt("coin view is not at the block's parent"));
    }

    let entries: Vec<TxBase> = block
        .transactions
        .iter()
        .cloned()
        .map(TxBase::Tx)
        .chain(block.certificates.iter().cloned().map(TxBase::Cert))
        .collect();
    let ids: Vec<Hash256> = entries.iter().map(TxLike::id).collect();

    for id in &ids {
        if view.have_coins(id)? {
            return Err(RejectReason::invalid(100, "bad-txns-BIP30").into());
        }
    }

    let prev_anchor = view.best_anchor()?;
    let mut undo = BlockUndo::new(prev_anchor);
    ledger::apply_maturing(view, &mut undo, height)?;
    let mut tree = start_tree(view, &prev_anchor)?;

    let mut checks: Vec<ScriptCheck<'_>> = Vec::new();
    let mut proofs: Vec<ProofContext> = Vec::new();
    let mut fees: Amount = 0;
    let mut sigops: u32 = 0;

    for (index, tx) in block.transactions.iter().enumerate() {
        let txid = ids[index];
        sigops = sigops.saturating_add(legacy_sigops(&tx.vin, &tx.vout));

        let mut tx_undo = TxUndo::default();
        if !tx.is_coinbase() {
            let outcome =
                spend_inputs(view, &entries[index], txid, height, &ctx.flags, &mut checks)?;
            sigops = sigops.saturating_add(outcome.p2sh_sigops);
            let value_in = tx
                .value_in_without_inputs()
                .and_then(|extra| checked_money_add(outcome.value_in, extra))
                .ok_or_else(|| RejectReason::invalid(100, "bad-txns-inputvalues-outofrange"))?;
            let value_out = tx
                .value_out()
                .ok_or_else(|| RejectReason::invalid(100, "bad-txns-txouttotal-toolarge"))?;
            if value_in < value_out {
                return Err(RejectReason::invalid(100, "bad-txns-in-belowout").into());
            }
            fees = checked_money_add(fees, value_in - value_out)
                .ok_or_else(|| RejectReason::invalid(100, "bad-txns-fee-outofrange"))?;
            tx_undo.spent = outcome.spent;
        }
        if sigops > MAX_BLOCK_SIGOPS {
            return Err(RejectReason::invalid(100, "bad-blk-sigops").into());
        }

        for (js_index, js) in tx.join_splits.iter().enumerate() {
            let known = js.anchor == tree_root(&tree)
                || js.anchor == empty_root()
                || view.anchor(&js.anchor)?.is_some();
            if !known {
                return Err(RejectReason::invalid(100, "bad-txns-joinsplit-anchor").into());
            }
            for nullifier in &js.nullifiers {
                if view.nullifier_spent(nullifier)? {
                    return Err(RejectReason::invalid(100, "bad-txns-joinsplit-nullifier-spent").into());
                }
                view.set_nullifier(nullifier, true)?;
            }
            for commitment in &js.commitments {
                if !append_commitment(&mut tree, commitment) {
                    return Err(RejectReason::invalid(100, "bad-txns-note-tree-full").into());
                }
            }
            proofs.push(ProofContext::JoinSplit {
                txid,
                index: js_index,
                anchor: js.anchor,
                proof: js.proof.clone(),
            });
        }

        if tx.is_sc_version() {
            proofs.extend(ledger::apply_tx_sidechain(
                view,
                &mut undo,
                tx,
                &txid,
                height,
                ctx.params.sc_coins_maturity,
            )?);
        }

        put_coins(view, &txid, CoinRecord::from_tx(tx, height))?;
        undo.txs.push(tx_undo);
    }

    let tx_count = block.transactions.len();
    for (offset, cert) in block.certificates.iter().enumerate() {
        let index = tx_count + offset;
        let cert_id = ids[index];
        sigops = sigops.saturating_add(legacy_sigops(&cert.vin, &cert.vout));
        let outcome = spend_inputs(view, &entries[index], cert_id, height, &ctx.flags, &mut checks)?;
        sigops = sigops.saturating_add(outcome.p2sh_sigops);
        if sigops > MAX_BLOCK_SIGOPS {
            return Err(RejectReason::invalid(100, "bad-blk-sigops").into());
        }
        let change = cert
            .change_total()
            .ok_or_else(|| RejectReason::invalid(100, "bad-cert-txouttotal-toolarge"))?;
        if outcome.value_in < change {
            return Err(RejectReason::invalid(100, "bad-cert-in-belowout").into());
        }
        fees = checked_money_add(fees, outcome.value_in - change)
            .ok_or_else(|| RejectReason::invalid(100, "bad-txns-fee-outofrange"))?;

        let Some(sc) = view.sidechain(&cert.sc_id)?.cloned() else {
            return Err(RejectReason::invalid(100, "bad-sc-cert-unknown-sidechain").into());
        };
        let plan = ledger::check_certificate(&sc, cert, height, ctx.chain)?;
        proofs.push(ledger::certificate_proof(&sc, cert, &plan));
        let voided = ledger::apply_certificate(view, &mut undo, cert, &plan, height)?;
        undo.certs.push(CertUndo {
            spent: outcome.spent,
            voided,
        });
    }

    let commitment = block.header.sc_txs_commitment;
    if block.header.supports_certificates() {
        if sc_txs_commitment(block) != commitment {
            return Err(RejectReason::invalid(100, "bad-sc-txs-commitment").into());
        }
        if commitment != [0u8; 32] {
            view.set_commitment_height(&commitment, Some(height))?;
        }
    }

    let reward = checked_money_add(fees, block_subsidy(height, ctx.params))
        .ok_or_else(|| RejectReason::invalid(100, "bad-cb-amount"))?;
    let coinbase_out = block.transactions[0]
        .value_out()
        .filter(|value| money_range(*value))
        .ok_or_else(|| RejectReason::invalid(100, "bad-cb-amount"))?;
    if coinbase_out > reward {
        return Err(RejectReason::invalid(100, "bad-cb-amount").into());
    }

    if !checks.is_empty() {
        let script_started = Instant::now();
        let result = ctx.checks.run(&checks, |check| check.run());
        log_cat!(
            Category::Bench,
            "verified {} inputs in {:?}",
            checks.len(),
            script_started.elapsed()
        );
        if let Err(failure) = result {
            log_warn!(
                "script validation failed for {} input {}: {}",
                hash256_to_hex(&failure.entry_id),
                failure.input_index,
                failure.error
            );
            return Err(RejectReason::invalid(100, "mandatory-script-verify-flag-failed").into());
        }
    }

    if ctx.flags.check_proofs && !proofs.is_empty() {
        if let Err(owner) = ctx.verifier.batch_verify(&proofs) {
            log_cat!(
                Category::Cert,
                "proof verification failed for {}",
                hash256_to_hex(&owner)
            );
            return Err(RejectReason::invalid(100, "bad-sc-proof").into());
        }
    }

    let ceased = ledger::apply_ceasing(view, &mut undo, height)?;
    undo.ceased = ceased;
    view.push_anchor(tree)?;
    view.set_best_block(ctx.block_hash);

    log_cat!(
        Category::Bench,
        "connected block {} at height {} ({} txs, {} certs) in {:?}",
        hash256_to_hex(&ctx.block_hash),
        height,
        block.transactions.len(),
        block.certificates.len(),
        started.elapsed()
    );
    Ok(undo)
}

/// Reverts `block`, which must be the view's best block, using its undo.
pub fn disconnect_block(
    view: &mut CoinView<'_>,
    block: &Block,
    undo: &BlockUndo,
) -> Result<(), ChainStateError> {
    let hash = block.hash();
    if view.best_block()? != Some(hash) {
        return Err(ChainStateError::Corrupt("coin view is not at the block"));
    }
    if undo.txs.len() != block.transactions.len() || undo.certs.len() != block.certificates.len() {
        return Err(ChainStateError::Corrupt("undo entry count mismatch"));
    }

    ledger::restore_voided(view, &undo.ceased)?;

    for (cert, cert_undo) in block.certificates.iter().zip(&undo.certs).rev() {
        view.erase_coins(&cert.hash())?;
        ledger::restore_voided(view, &cert_undo.voided)?;
        restore_inputs(view, &cert.vin, &cert_undo.spent)?;
    }

    for (tx, tx_undo) in block.transactions.iter().zip(&undo.txs).rev() {
        let txid = tx.txid();
        view.erase_coins(&txid)?;
        for nullifier in tx.nullifiers() {
            view.set_nullifier(nullifier, false)?;
        }
        for csw in &tx.vcsw_ccin {
            view.set_csw_nullifier(&csw.sc_id, &csw.nullifier, false)?;
        }
        if !tx.is_coinbase() {
            restore_inputs(view, &tx.vin, &tx_undo.spent)?;
        }
    }

    ledger::restore_snapshots(view, undo)?;

    let commitment = block.header.sc_txs_commitment;
    if block.header.supports_certificates() && commitment != [0u8; 32] {
        view.set_commitment_height(&commitment, None)?;
    }
    view.pop_anchor(undo.prev_anchor)?;
    view.set_best_block(block.header.prev_block);
    Ok(())
}
