//! Input signing for P2PKH and P2WPKH outputs.

use crate::error::WalletError;
use crate::keys::DerivedKey;
use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::script::PushBytesBuf;
use bitcoin::secp256k1::{Message, Secp256k1, Signing};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, OutPoint, ScriptBuf, Transaction, Witness};

/// An input of the transaction being signed, with what it spends.
pub struct InputToSign<'a> {
    pub outpoint: OutPoint,
    /// Locking script of the funding output, as reported by the node.
    pub script_pubkey: ScriptBuf,
    pub value: Amount,
    pub key: &'a DerivedKey,
}

enum Unlock {
    ScriptSig(ScriptBuf),
    Witness(Witness),
}

/// Sign every input of `tx` with SIGHASH_ALL. `inputs[i]` describes `tx.input[i]`.
pub fn sign_inputs<C: Signing>(
    secp: &Secp256k1<C>,
    tx: &mut Transaction,
    inputs: &[InputToSign<'_>],
) -> Result<(), WalletError> {
    if inputs.len() != tx.input.len() {
        return Err(WalletError::Signing(format!(
            "{} signing inputs for {} transaction inputs",
            inputs.len(),
            tx.input.len()
        )));
    }

    // Neither sighash algorithm commits to other inputs' unlocking data, so
    // all signatures are computed over the unsigned transaction.
    let unsigned = tx.clone();
    let mut cache = SighashCache::new(&unsigned);
    let mut unlocks = Vec::with_capacity(inputs.len());

    for (i, input) in inputs.iter().enumerate() {
        if tx.input[i].previous_output != input.outpoint {
            return Err(WalletError::Signing(format!("input {} does not spend {}", i, input.outpoint)));
        }
        if input.script_pubkey != input.key.address.script_pubkey() {
            return Err(WalletError::UnsupportedScript {
                outpoint: input.outpoint,
                reason: format!("funding script does not pay {}", input.key.address),
            });
        }

        let unlock = if input.script_pubkey.is_p2pkh() {
            let sighash = cache
                .legacy_signature_hash(i, &input.script_pubkey, EcdsaSighashType::All.to_u32())
                .map_err(|e| WalletError::Signing(e.to_string()))?;
            let msg = Message::from_digest(sighash.to_byte_array());
            let sig = ecdsa::Signature::sighash_all(secp.sign_ecdsa(&msg, &input.key.private_key.inner));

            let sig_push = PushBytesBuf::try_from(sig.to_vec())
                .map_err(|e| WalletError::Signing(e.to_string()))?;
            Unlock::ScriptSig(
                ScriptBuf::builder()
                    .push_slice(sig_push)
                    .push_key(&input.key.public_key)
                    .into_script(),
            )
        } else if input.script_pubkey.is_p2wpkh() {
            let sighash = cache
                .p2wpkh_signature_hash(i, &input.script_pubkey, input.value, EcdsaSighashType::All)
                .map_err(|e| WalletError::Signing(e.to_string()))?;
            let msg = Message::from_digest(sighash.to_byte_array());
            let sig = ecdsa::Signature::sighash_all(secp.sign_ecdsa(&msg, &input.key.private_key.inner));
            Unlock::Witness(Witness::p2wpkh(&sig, &input.key.public_key.inner))
        } else {
            return Err(WalletError::UnsupportedScript {
                outpoint: input.outpoint,
                reason: "only p2pkh and p2wpkh outputs can be spent".into(),
            });
        };
        unlocks.push(unlock);
    }

    for (txin, unlock) in tx.input.iter_mut().zip(unlocks) {
        match unlock {
            Unlock::ScriptSig(script) => txin.script_sig = script,
            Unlock::Witness(witness) => txin.witness = witness,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_keys;
    use crate::session::SessionSeed;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Network, Sequence, TxIn, TxOut, Txid};
    use tilepay_types::AddressKind;

    fn key(kind: AddressKind) -> DerivedKey {
        let secp = Secp256k1::new();
        let seed = SessionSeed::from_bytes(&[5u8; 32]).unwrap();
        derive_keys(&secp, &seed, 1, Network::Regtest, kind).unwrap().remove(0)
    }

    fn spending_tx(outpoint: OutPoint) -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(90_000),
                script_pubkey: ScriptBuf::from_bytes(vec![0x6a, 0x04, 0, 0, 0, 0]),
            }],
        }
    }

    #[test]
    fn test_sign_p2pkh_verifies() {
        let secp = Secp256k1::new();
        let key = key(AddressKind::P2pkh);
        let outpoint = OutPoint::new(Txid::from_byte_array([3; 32]), 1);
        let script = key.address.script_pubkey();
        let mut tx = spending_tx(outpoint);

        sign_inputs(
            &secp,
            &mut tx,
            &[InputToSign {
                outpoint,
                script_pubkey: script.clone(),
                value: Amount::from_sat(100_000),
                key: &key,
            }],
        )
        .unwrap();

        assert!(tx.input[0].witness.is_empty());
        let pushes: Vec<_> = tx.input[0].script_sig.instructions().collect::<Result<_, _>>().unwrap();
        assert_eq!(pushes.len(), 2);
        let sig_bytes = pushes[0].push_bytes().unwrap().as_bytes();
        let sig = ecdsa::Signature::from_slice(sig_bytes).unwrap();
        assert_eq!(sig.sighash_type, EcdsaSighashType::All);
        assert_eq!(pushes[1].push_bytes().unwrap().as_bytes(), key.public_key.to_bytes().as_slice());

        let sighash = SighashCache::new(&tx)
            .legacy_signature_hash(0, &script, EcdsaSighashType::All.to_u32())
            .unwrap();
        let msg = Message::from_digest(sighash.to_byte_array());
        secp.verify_ecdsa(&msg, &sig.signature, &key.public_key.inner).unwrap();
    }

    #[test]
    fn test_sign_p2wpkh_verifies() {
        let secp = Secp256k1::new();
        let key = key(AddressKind::P2wpkh);
        let outpoint = OutPoint::new(Txid::from_byte_array([4; 32]), 0);
        let script = key.address.script_pubkey();
        let value = Amount::from_sat(100_000);
        let mut tx = spending_tx(outpoint);

        sign_inputs(
            &secp,
            &mut tx,
            &[InputToSign {
                outpoint,
                script_pubkey: script.clone(),
                value,
                key: &key,
            }],
        )
        .unwrap();

        assert!(tx.input[0].script_sig.is_empty());
        let witness = &tx.input[0].witness;
        assert_eq!(witness.len(), 2);
        let sig = ecdsa::Signature::from_slice(&witness[0]).unwrap();

        let sighash = SighashCache::new(&tx)
            .p2wpkh_signature_hash(0, &script, value, EcdsaSighashType::All)
            .unwrap();
        let msg = Message::from_digest(sighash.to_byte_array());
        secp.verify_ecdsa(&msg, &sig.signature, &key.public_key.inner).unwrap();
    }

    #[test]
    fn test_rejects_script_of_other_address() {
        let secp = Secp256k1::new();
        let key = key(AddressKind::P2pkh);
        let outpoint = OutPoint::new(Txid::from_byte_array([3; 32]), 0);
        let mut tx = spending_tx(outpoint);

        let err = sign_inputs(
            &secp,
            &mut tx,
            &[InputToSign {
                outpoint,
                script_pubkey: ScriptBuf::from_bytes(vec![0x6a, 0x04, 1, 1, 1, 1]),
                value: Amount::from_sat(1),
                key: &key,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::UnsupportedScript { .. }));
        assert!(tx.input[0].script_sig.is_empty());
    }
}
