//! Sidechain ledger rules applied while connecting a block.
//!
//! The `check_*` functions are pure and shared with mempool admission. The
//! `apply_*` functions mutate a [`CoinView`] and snapshot every sidechain
//! record and event slot they touch into the block undo, so disconnecting
//! only has to put the snapshots back.

use zend_consensus::money::{checked_money_add, money_range, Amount};
use zend_consensus::Hash256;
use zend_primitives::transaction::{CswInput, ForwardTransferOutput};
use zend_primitives::{ScCertificate, Transaction};

use crate::chain::ActiveChain;
use crate::coins::CoinRecord;
use crate::error::{ChainStateError, RejectReason};
use crate::proof::ProofContext;
use crate::sidechain::{ScState, SidechainRecord};
use crate::undo::{BlockUndo, SpentCoin, VoidedOutput};
use crate::view::CoinView;

fn cert_reject(reason: &str) -> RejectReason {
    RejectReason::invalid(100, reason)
}

/// Outcome of checking a certificate against its sidechain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificatePlan {
    /// Hash of the certificate for the same epoch it replaces, if any.
    pub supersedes: Option<Hash256>,
    pub bwt_total: Amount,
    pub prev_end_epoch_block_hash: Hash256,
}

/// Contextual certificate rules for inclusion at `height` on top of `chain`.
pub fn check_certificate(
    sc: &SidechainRecord,
    cert: &ScCertificate,
    height: i32,
    chain: &ActiveChain,
) -> Result<CertificatePlan, RejectReason> {
    if sc.state_at(height) != ScState::Alive {
        return Err(cert_reject("bad-sc-cert-not-alive"));
    }
    let last_epoch = sc.last_top_quality_cert_epoch;
    let supersedes = if cert.epoch_number == last_epoch {
        if cert.quality <= sc.last_top_quality_cert_quality {
            return Err(cert_reject("bad-sc-cert-quality"));
        }
        Some(sc.last_top_quality_cert_hash)
    } else if cert.epoch_number == last_epoch + 1 {
        None
    } else {
        return Err(cert_reject("bad-sc-cert-epoch"));
    };

    if height < sc.cert_window_start(cert.epoch_number)
        || height > sc.cert_window_end(cert.epoch_number)
    {
        return Err(cert_reject("bad-sc-cert-window"));
    }

    let end_epoch_height = sc.start_height_for_epoch(cert.epoch_number + 1) - 1;
    if chain.hash_at(end_epoch_height) != Some(cert.end_epoch_block_hash) {
        return Err(cert_reject("bad-sc-cert-end-epoch-hash"));
    }
    let prev_end_epoch_block_hash = chain
        .hash_at(sc.start_height_for_epoch(cert.epoch_number) - 1)
        .unwrap_or([0u8; 32]);

    let bwt_total = cert
        .bwt_total()
        .filter(|total| money_range(*total))
        .ok_or_else(|| cert_reject("bad-sc-cert-bwt-amount"))?;
    let available = if supersedes.is_some() {
        sc.balance + sc.last_top_quality_cert_bwt_amount
    } else {
        sc.balance
    };
    if bwt_total > available {
        return Err(cert_reject("bad-sc-cert-insufficient-balance"));
    }

    Ok(CertificatePlan {
        supersedes,
        bwt_total,
        prev_end_epoch_block_hash,
    })
}

pub fn certificate_proof(
    sc: &SidechainRecord,
    cert: &ScCertificate,
    plan: &CertificatePlan,
) -> ProofContext {
    ProofContext::Certificate {
        id: cert.hash(),
        sc_id: cert.sc_id,
        epoch_number: cert.epoch_number,
        quality: cert.quality,
        end_epoch_block_hash: cert.end_epoch_block_hash,
        prev_end_epoch_block_hash: plan.prev_end_epoch_block_hash,
        bwt_total: plan.bwt_total,
        vk: sc.wcert_vk.clone(),
        proof: cert.sc_proof.clone(),
    }
}

pub fn check_forward_transfer(
    sc: Option<&SidechainRecord>,
    ft: &ForwardTransferOutput,
    height: i32,
) -> Result<(), RejectReason> {
    let sc = sc.ok_or_else(|| RejectReason::invalid(10, "bad-sc-ft-unknown-sidechain"))?;
    if sc.state_at(height) == ScState::Ceased {
        return Err(RejectReason::invalid(10, "bad-sc-ft-not-alive"));
    }
    if !money_range(ft.value) || ft.value == 0 {
        return Err(RejectReason::invalid(100, "bad-sc-ft-amount"));
    }
    Ok(())
}

/// Rules a ceased sidechain withdrawal must satisfy; `already_claimed` is
/// the value withdrawn from the same sidechain earlier in the block or pool.
pub fn check_csw(
    sc: Option<&SidechainRecord>,
    csw: &CswInput,
    height: i32,
    already_claimed: Amount,
) -> Result<(), RejectReason> {
    let sc = sc.ok_or_else(|| RejectReason::invalid(10, "bad-sc-csw-unknown-sidechain"))?;
    if sc.state_at(height) != ScState::Ceased {
        return Err(RejectReason::invalid(10, "bad-sc-csw-not-ceased"));
    }
    if !money_range(csw.value) || csw.value == 0 {
        return Err(RejectReason::invalid(100, "bad-sc-csw-amount"));
    }
    let claimed = checked_money_add(already_claimed, csw.value)
        .ok_or_else(|| RejectReason::invalid(100, "bad-sc-csw-amount"))?;
    if claimed > sc.balance {
        return Err(RejectReason::invalid(100, "bad-sc-csw-insufficient-balance"));
    }
    Ok(())
}

fn snapshot_sidechain(
    view: &mut CoinView<'_>,
    undo: &mut BlockUndo,
    sc_id: &Hash256,
) -> Result<Option<SidechainRecord>, ChainStateError> {
    let record = view.sidechain(sc_id)?.cloned();
    undo.record_sidechain(sc_id, record.clone());
    Ok(record)
}

fn edit_events(
    view: &mut CoinView<'_>,
    undo: &mut BlockUndo,
    height: i32,
    edit: impl FnOnce(&mut crate::sidechain::ScEvents),
) -> Result<(), ChainStateError> {
    let mut events = view.sc_events(height)?;
    undo.record_events(height, (!events.is_empty()).then(|| events.clone()));
    edit(&mut events);
    view.set_sc_events(height, events)?;
    Ok(())
}

fn schedule_immature(
    view: &mut CoinView<'_>,
    undo: &mut BlockUndo,
    record: &mut SidechainRecord,
    sc_id: &Hash256,
    value: Amount,
    height: i32,
    maturity: i32,
) -> Result<(), ChainStateError> {
    if maturity <= 0 {
        record.balance += value;
        return Ok(());
    }
    let maturity_height = height + maturity;
    *record.immature_amounts.entry(maturity_height).or_insert(0) += value;
    edit_events(view, undo, maturity_height, |events| {
        events.maturing.insert(*sc_id);
    })
}

/// Moves forward transfers that mature at `height` into the balances.
pub fn apply_maturing(
    view: &mut CoinView<'_>,
    undo: &mut BlockUndo,
    height: i32,
) -> Result<(), ChainStateError> {
    let events = view.sc_events(height)?;
    for sc_id in &events.maturing {
        let Some(mut record) = snapshot_sidechain(view, undo, sc_id)? else {
            return Err(ChainStateError::Corrupt("maturing event for unknown sidechain"));
        };
        if let Some(amount) = record.immature_amounts.remove(&height) {
            record.balance += amount;
            zend_log::log_cat!(
                zend_log::Category::Sc,
                "sidechain {} matured {} at height {}",
                zend_consensus::hash256_to_hex(sc_id),
                amount,
                height
            );
        }
        view.update_sidechain(sc_id, Some(record))?;
    }
    Ok(())
}

/// Applies the sidechain creations, forward transfers and withdrawals of
/// `tx`, returning the proofs its withdrawals carry.
pub fn apply_tx_sidechain(
    view: &mut CoinView<'_>,
    undo: &mut BlockUndo,
    tx: &Transaction,
    txid: &Hash256,
    height: i32,
    sc_coins_maturity: i32,
) -> Result<Vec<ProofContext>, ChainStateError> {
    let mut proofs = Vec::new();

    for (index, creation) in tx.vsc_ccout.iter().enumerate() {
        let sc_id = tx.sc_id_for_creation(txid, index);
        if view.have_sidechain(&sc_id)? {
            return Err(RejectReason::invalid(100, "sidechain-creation-id-already-in-use").into());
        }
        undo.record_sidechain(&sc_id, None);
        let mut record = SidechainRecord::new(
            height,
            *txid,
            creation.withdrawal_epoch_length,
            creation.custom_data.clone(),
            creation.wcert_vk.clone(),
        );
        schedule_immature(
            view,
            undo,
            &mut record,
            &sc_id,
            creation.value,
            height,
            sc_coins_maturity,
        )?;
        let ceasing = record.scheduled_ceasing_height();
        edit_events(view, undo, ceasing, |events| {
            events.ceasing.insert(sc_id);
        })?;
        view.update_sidechain(&sc_id, Some(record))?;
        zend_log::log_cat!(
            zend_log::Category::Sc,
            "sidechain {} created at height {}, ceasing at {}",
            zend_consensus::hash256_to_hex(&sc_id),
            height,
            ceasing
        );
    }

    for ft in &tx.vft_ccout {
        let record = snapshot_sidechain(view, undo, &ft.sc_id)?;
        check_forward_transfer(record.as_ref(), ft, height)?;
        let Some(mut record) = record else {
            continue;
        };
        schedule_immature(
            view,
            undo,
            &mut record,
            &ft.sc_id,
            ft.value,
            height,
            sc_coins_maturity,
        )?;
        view.update_sidechain(&ft.sc_id, Some(record))?;
    }

    for csw in &tx.vcsw_ccin {
        let record = snapshot_sidechain(view, undo, &csw.sc_id)?;
        check_csw(record.as_ref(), csw, height, 0)?;
        let Some(mut record) = record else {
            continue;
        };
        if view.csw_nullifier_spent(&csw.sc_id, &csw.nullifier)? {
            return Err(RejectReason::invalid(100, "bad-sc-csw-nullifier-spent").into());
        }
        view.set_csw_nullifier(&csw.sc_id, &csw.nullifier, true)?;
        record.balance -= csw.value;
        view.update_sidechain(&csw.sc_id, Some(record))?;
        proofs.push(ProofContext::Csw {
            txid: *txid,
            sc_id: csw.sc_id,
            value: csw.value,
            nullifier: csw.nullifier,
            pub_key_hash: csw.pub_key_hash,
            proof: csw.proof.clone(),
        });
    }

    Ok(proofs)
}

/// Removes the backward transfer outputs of certificate `cert_hash` from
/// the coin set, returning what was removed.
fn void_bwt_outputs(
    view: &mut CoinView<'_>,
    cert_hash: &Hash256,
) -> Result<Vec<VoidedOutput>, ChainStateError> {
    let Some(record) = view.access_coins(cert_hash)? else {
        return Ok(Vec::new());
    };
    let meta = record.meta;
    let positions: Vec<u32> = (meta.first_bwt_pos..record.outputs.len() as u32)
        .filter(|pos| record.is_available(*pos))
        .collect();
    let mut voided = Vec::with_capacity(positions.len());
    for pos in positions {
        if let Some((meta, out)) = view.spend_coin(cert_hash, pos)? {
            voided.push(VoidedOutput {
                txid: *cert_hash,
                pos,
                coin: SpentCoin { meta, out },
            });
        }
    }
    Ok(voided)
}

/// Applies an accepted certificate to its sidechain and adds its outputs.
/// Returns the outputs of the superseded certificate, if any.
pub fn apply_certificate(
    view: &mut CoinView<'_>,
    undo: &mut BlockUndo,
    cert: &ScCertificate,
    plan: &CertificatePlan,
    height: i32,
) -> Result<Vec<VoidedOutput>, ChainStateError> {
    let Some(mut record) = snapshot_sidechain(view, undo, &cert.sc_id)? else {
        return Err(RejectReason::invalid(100, "bad-sc-cert-unknown-sidechain").into());
    };
    let cert_hash = cert.hash();

    let mut voided = Vec::new();
    if let Some(previous) = plan.supersedes {
        record.balance += record.last_top_quality_cert_bwt_amount;
        voided = void_bwt_outputs(view, &previous)?;
        zend_log::log_cat!(
            zend_log::Category::Cert,
            "certificate {} supersedes {} for epoch {}",
            zend_consensus::hash256_to_hex(&cert_hash),
            zend_consensus::hash256_to_hex(&previous),
            cert.epoch_number
        );
    } else {
        let old_ceasing = record.scheduled_ceasing_height();
        let new_ceasing = record.cert_window_end(cert.epoch_number + 1);
        edit_events(view, undo, old_ceasing, |events| {
            events.ceasing.remove(&cert.sc_id);
        })?;
        edit_events(view, undo, new_ceasing, |events| {
            events.ceasing.insert(cert.sc_id);
        })?;
    }

    record.balance -= plan.bwt_total;
    record.last_top_quality_cert_hash = cert_hash;
    record.last_top_quality_cert_epoch = cert.epoch_number;
    record.last_top_quality_cert_quality = cert.quality;
    record.last_top_quality_cert_bwt_amount = plan.bwt_total;
    let bwt_maturity = record.bwt_maturity_height(cert.epoch_number);
    view.update_sidechain(&cert.sc_id, Some(record))?;

    let coins = CoinRecord::from_cert(cert, height, bwt_maturity);
    let slot = view.modify_coins(&cert_hash, || coins.clone())?;
    *slot = coins;
    Ok(voided)
}

/// Ceases every sidechain scheduled to stop at `height`: the backward
/// transfers of its last certificate are voided and their value returns to
/// the balance, which ceased withdrawals can then claim.
pub fn apply_ceasing(
    view: &mut CoinView<'_>,
    undo: &mut BlockUndo,
    height: i32,
) -> Result<Vec<VoidedOutput>, ChainStateError> {
    let events = view.sc_events(height)?;
    let mut ceased = Vec::new();
    for sc_id in &events.ceasing {
        let Some(mut record) = snapshot_sidechain(view, undo, sc_id)? else {
            return Err(ChainStateError::Corrupt("ceasing event for unknown sidechain"));
        };
        if record.scheduled_ceasing_height() != height {
            continue;
        }
        if record.last_top_quality_cert_epoch >= 0 {
            ceased.extend(void_bwt_outputs(view, &record.last_top_quality_cert_hash)?);
            record.balance += record.last_top_quality_cert_bwt_amount;
            record.last_top_quality_cert_bwt_amount = 0;
        }
        view.update_sidechain(sc_id, Some(record))?;
        zend_log::log_cat!(
            zend_log::Category::Sc,
            "sidechain {} ceased at height {}",
            zend_consensus::hash256_to_hex(sc_id),
            height
        );
    }
    Ok(ceased)
}

/// Puts voided outputs back into their records.
pub fn restore_voided(
    view: &mut CoinView<'_>,
    voided: &[VoidedOutput],
) -> Result<(), ChainStateError> {
    for entry in voided.iter().rev() {
        let record = view.modify_coins(&entry.txid, || CoinRecord::empty(entry.coin.meta))?;
        if !record.restore(entry.pos, entry.coin.out.clone()) {
            return Err(ChainStateError::Corrupt("voided output already present"));
        }
    }
    Ok(())
}

/// Restores sidechain records and event slots to their pre-block state.
pub fn restore_snapshots(view: &mut CoinView<'_>, undo: &BlockUndo) -> Result<(), ChainStateError> {
    for (sc_id, record) in &undo.sidechains {
        view.update_sidechain(sc_id, record.clone())?;
    }
    for (height, events) in &undo.events {
        view.set_sc_events(*height, events.clone().unwrap_or_default())?;
    }
    Ok(())
}
