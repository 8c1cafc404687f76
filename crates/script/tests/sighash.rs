use zend_consensus::constants::SC_CERT_VERSION;
use zend_primitives::certificate::{BackwardTransfer, ScCertificate};
use zend_primitives::outpoint::OutPoint;
use zend_primitives::transaction::{TxIn, TxOut};
use zend_primitives::txbase::TxBase;
use zend_script::sighash::{
    signature_hash, SighashType, SIGHASH_ALL, SIGHASH_ANYONECANPAY, SIGHASH_NONE, SIGHASH_SINGLE,
};

#[test]
fn sighash_type_flags() {
    let combined = SighashType(SIGHASH_ALL | SIGHASH_ANYONECANPAY);
    assert_eq!(combined.base_type(), SIGHASH_ALL);
    assert!(combined.has_anyone_can_pay());

    let none = SighashType(SIGHASH_NONE);
    assert_eq!(none.base_type(), SIGHASH_NONE);
    assert!(!none.has_anyone_can_pay());

    let single = SighashType(SIGHASH_SINGLE | SIGHASH_ANYONECANPAY);
    assert_eq!(single.base_type(), SIGHASH_SINGLE);
    assert!(single.has_anyone_can_pay());
}

#[test]
fn certificate_sighash_commits_to_quality_and_transfers() {
    let cert = ScCertificate {
        version: SC_CERT_VERSION,
        sc_id: [1u8; 32],
        epoch_number: 0,
        quality: 5,
        end_epoch_block_hash: [2u8; 32],
        sc_proof: Vec::new(),
        vin: vec![TxIn {
            prevout: OutPoint::new([3u8; 32], 0),
            script_sig: Vec::new(),
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: 1,
            script_pubkey: vec![0x51],
        }],
        backward_transfers: vec![BackwardTransfer {
            amount: 2,
            pub_key_hash: [4u8; 20],
        }],
    };
    let base = signature_hash(
        &TxBase::Cert(cert.clone()),
        0,
        &[0xac],
        SighashType(SIGHASH_ALL),
    )
    .expect("sighash");

    let mut higher = cert.clone();
    higher.quality = 6;
    let mut redirected = cert;
    redirected.backward_transfers[0].pub_key_hash = [5u8; 20];
    for changed in [higher, redirected] {
        let hash = signature_hash(&TxBase::Cert(changed), 0, &[0xac], SighashType(SIGHASH_ALL))
            .expect("sighash");
        assert_ne!(hash, base);
    }
}
