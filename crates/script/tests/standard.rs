use zend_script::standard::{
    classify_script_pubkey, is_standard_script_sig, ScriptType, MAX_OP_RETURN_RELAY,
};

#[test]
fn classify_p2pkh() {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&[0x11; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    assert_eq!(classify_script_pubkey(&script), ScriptType::P2Pkh);
}

#[test]
fn classify_p2sh() {
    let mut script = vec![0xa9, 0x14];
    script.extend_from_slice(&[0x22; 20]);
    script.push(0x87);
    assert_eq!(classify_script_pubkey(&script), ScriptType::P2Sh);
}

#[test]
fn classify_p2pk() {
    let mut script = vec![33];
    script.extend_from_slice(&[0x02; 33]);
    script.push(0xac);
    assert_eq!(classify_script_pubkey(&script), ScriptType::P2Pk);
}

#[test]
fn classify_null_data() {
    assert_eq!(
        classify_script_pubkey(&[0x6a, 0x01, 0x01]),
        ScriptType::NullData
    );
    let mut oversized = vec![0x6a, 0x4c, MAX_OP_RETURN_RELAY as u8];
    oversized.extend(std::iter::repeat(0u8).take(MAX_OP_RETURN_RELAY));
    assert_eq!(classify_script_pubkey(&oversized), ScriptType::Unknown);
}

#[test]
fn classify_bare_multisig() {
    let mut script = vec![0x51];
    for _ in 0..2 {
        script.push(33);
        script.extend_from_slice(&[0x03; 33]);
    }
    script.extend_from_slice(&[0x52, 0xae]);
    assert_eq!(classify_script_pubkey(&script), ScriptType::MultiSig);
}

#[test]
fn classify_unknown() {
    assert_eq!(classify_script_pubkey(&[0x51]), ScriptType::Unknown);
    assert!(is_standard_script_sig(&[0x01, 0x02]));
    assert!(!is_standard_script_sig(&[0x76]));
}
