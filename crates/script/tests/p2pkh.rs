use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use zend_primitives::hash::hash160;
use zend_primitives::outpoint::OutPoint;
use zend_primitives::transaction::{p2pkh_script, Transaction, TxIn, TxOut};
use zend_primitives::txbase::TxBase;
use zend_script::interpreter::{verify_input, ScriptError, STANDARD_SCRIPT_VERIFY_FLAGS};
use zend_script::sighash::{signature_hash, SighashType, SIGHASH_ALL};

fn spend(prev_script: &[u8]) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::new([4u8; 32], 0),
            script_sig: Vec::new(),
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: 1_000,
            script_pubkey: prev_script.to_vec(),
        }],
        vcsw_ccin: Vec::new(),
        vsc_ccout: Vec::new(),
        vft_ccout: Vec::new(),
        lock_time: 0,
        join_splits: Vec::new(),
    }
}

fn sign(tx: &mut Transaction, secret: &SecretKey, prev_script: &[u8]) {
    let secp = Secp256k1::new();
    let pubkey = PublicKey::from_secret_key(&secp, secret).serialize();
    let sighash = signature_hash(
        &TxBase::Tx(tx.clone()),
        0,
        prev_script,
        SighashType(SIGHASH_ALL),
    )
    .expect("sighash");
    let sig = secp.sign_ecdsa(&Message::from_digest(sighash), secret);
    let mut der = sig.serialize_der().to_vec();
    der.push(SIGHASH_ALL as u8);

    let mut script_sig = vec![der.len() as u8];
    script_sig.extend_from_slice(&der);
    script_sig.push(pubkey.len() as u8);
    script_sig.extend_from_slice(&pubkey);
    tx.vin[0].script_sig = script_sig;
}

#[test]
fn signed_p2pkh_spend_verifies() {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[0x21; 32]).expect("secret");
    let pubkey = PublicKey::from_secret_key(&secp, &secret).serialize();
    let prev_script = p2pkh_script(&hash160(&pubkey));

    let mut tx = spend(&prev_script);
    sign(&mut tx, &secret, &prev_script);
    let entry = TxBase::Tx(tx.clone());
    assert_eq!(
        verify_input(&entry, 0, &prev_script, STANDARD_SCRIPT_VERIFY_FLAGS),
        Ok(())
    );

    // Changing an output after signing invalidates the signature.
    tx.vout[0].value += 1;
    let tampered = TxBase::Tx(tx);
    assert_eq!(
        verify_input(&tampered, 0, &prev_script, STANDARD_SCRIPT_VERIFY_FLAGS),
        Err(ScriptError::EvalFalse)
    );
}

#[test]
fn wrong_key_fails_equalverify() {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[0x21; 32]).expect("secret");
    let other = SecretKey::from_slice(&[0x22; 32]).expect("secret");
    let pubkey = PublicKey::from_secret_key(&secp, &secret).serialize();
    let prev_script = p2pkh_script(&hash160(&pubkey));

    let mut tx = spend(&prev_script);
    sign(&mut tx, &other, &prev_script);
    assert_eq!(
        verify_input(&TxBase::Tx(tx), 0, &prev_script, STANDARD_SCRIPT_VERIFY_FLAGS),
        Err(ScriptError::EvalFalse)
    );
}
