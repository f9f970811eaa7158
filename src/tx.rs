//! Transaction parsing for the byte-level entry points.

use bitcoin::{consensus, Transaction};

use crate::Error;

/// A spending transaction parsed from wire bytes.
///
/// Parsing re-serializes the transaction to guarantee the caller handed us a
/// canonical encoding with no trailing data; anything else is rejected before
/// script evaluation starts.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    tx: Transaction,
}

impl TransactionContext {
    pub fn parse(tx_bytes: &[u8]) -> Result<Self, Error> {
        let tx: Transaction =
            consensus::deserialize(tx_bytes).map_err(|_| Error::TxDeserialize)?;

        let canonical = consensus::serialize(&tx);
        if canonical.len() != tx_bytes.len() {
            return Err(Error::TxSizeMismatch);
        }

        Ok(Self { tx })
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    /// Ensures `input_index` points to an existing transaction input.
    pub fn ensure_input_index(&self, input_index: usize) -> Result<(), Error> {
        if input_index >= self.tx.input.len() {
            Err(Error::TxIndex)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::absolute::LockTime;
    use bitcoin::blockdata::script::ScriptBuf;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, Sequence, TxIn, TxOut, Witness};

    fn sample_tx() -> Transaction {
        Transaction {
            version: Version(2),
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: bitcoin::Txid::from_byte_array([1u8; 32]),
                    vout: 0,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(42),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    #[test]
    fn parses_canonical_bytes() {
        let tx = sample_tx();
        let encoded = consensus::serialize(&tx);
        let ctx = TransactionContext::parse(&encoded).expect("valid tx");
        assert_eq!(ctx.tx().compute_txid(), tx.compute_txid());
        assert!(ctx.ensure_input_index(0).is_ok());
        assert_eq!(ctx.ensure_input_index(1).unwrap_err(), Error::TxIndex);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            TransactionContext::parse(&[0x00, 0x01]).unwrap_err(),
            Error::TxDeserialize
        );
    }
}
