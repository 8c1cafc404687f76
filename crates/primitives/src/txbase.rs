//! Shared view over transactions and certificates.

use zend_consensus::money::Amount;
use zend_consensus::Hash256;

use crate::certificate::ScCertificate;
use crate::transaction::{Transaction, TxIn, TxOut};

/// Accessors validation and the mempool need regardless of whether the
/// entry is a transaction or a certificate.
pub trait TxLike {
    fn id(&self) -> Hash256;
    fn version(&self) -> i32;
    fn inputs(&self) -> &[TxIn];
    /// Outputs as they appear in the coin set.
    fn coin_outputs(&self) -> Vec<TxOut>;
    /// Value released into the transparent pool without spending an input.
    fn extra_value_in(&self) -> Option<Amount>;
    fn value_out(&self) -> Option<Amount>;
    fn serialized_size(&self) -> usize;
}

impl TxLike for Transaction {
    fn id(&self) -> Hash256 {
        self.txid()
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn inputs(&self) -> &[TxIn] {
        &self.vin
    }

    fn coin_outputs(&self) -> Vec<TxOut> {
        self.vout.clone()
    }

    fn extra_value_in(&self) -> Option<Amount> {
        self.value_in_without_inputs()
    }

    fn value_out(&self) -> Option<Amount> {
        Transaction::value_out(self)
    }

    fn serialized_size(&self) -> usize {
        Transaction::serialized_size(self)
    }
}

impl TxLike for ScCertificate {
    fn id(&self) -> Hash256 {
        self.hash()
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn inputs(&self) -> &[TxIn] {
        &self.vin
    }

    fn coin_outputs(&self) -> Vec<TxOut> {
        self.all_outputs()
    }

    fn extra_value_in(&self) -> Option<Amount> {
        Some(0)
    }

    /// Only change counts; backward transfers are paid from the sidechain
    /// balance, not from the certificate inputs.
    fn value_out(&self) -> Option<Amount> {
        self.change_total()
    }

    fn serialized_size(&self) -> usize {
        ScCertificate::serialized_size(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxBase {
    Tx(Transaction),
    Cert(ScCertificate),
}

impl TxBase {
    pub fn is_certificate(&self) -> bool {
        matches!(self, TxBase::Cert(_))
    }

    pub fn as_tx(&self) -> Option<&Transaction> {
        match self {
            TxBase::Tx(tx) => Some(tx),
            TxBase::Cert(_) => None,
        }
    }

    pub fn as_cert(&self) -> Option<&ScCertificate> {
        match self {
            TxBase::Cert(cert) => Some(cert),
            TxBase::Tx(_) => None,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $body:expr) => {
        match $self {
            TxBase::Tx($inner) => $body,
            TxBase::Cert($inner) => $body,
        }
    };
}

impl TxLike for TxBase {
    fn id(&self) -> Hash256 {
        dispatch!(self, inner => inner.id())
    }

    fn version(&self) -> i32 {
        dispatch!(self, inner => inner.version)
    }

    fn inputs(&self) -> &[TxIn] {
        dispatch!(self, inner => &inner.vin)
    }

    fn coin_outputs(&self) -> Vec<TxOut> {
        dispatch!(self, inner => inner.coin_outputs())
    }

    fn extra_value_in(&self) -> Option<Amount> {
        dispatch!(self, inner => inner.extra_value_in())
    }

    fn value_out(&self) -> Option<Amount> {
        dispatch!(self, inner => TxLike::value_out(inner))
    }

    fn serialized_size(&self) -> usize {
        dispatch!(self, inner => TxLike::serialized_size(inner))
    }
}

impl From<Transaction> for TxBase {
    fn from(tx: Transaction) -> Self {
        TxBase::Tx(tx)
    }
}

impl From<ScCertificate> for TxBase {
    fn from(cert: ScCertificate) -> Self {
        TxBase::Cert(cert)
    }
}
