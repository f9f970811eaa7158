use bitcoin::absolute::LockTime;
use bitcoin::blockdata::script::{Builder, PushBytesBuf, ScriptBuf};
use bitcoin::hashes::{hash160, Hash};
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{consensus, Amount, OutPoint, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use criterion::{criterion_group, criterion_main, Criterion};
use script_consensus::standard::{classify, multisig_script, pay_to_pubkey_hash};
use script_consensus::{verify_spend, SIGHASH_ALL, STANDARD_VERIFY_FLAGS, VERIFY_NONE};

struct BenchCase {
    name: &'static str,
    script_pubkey: Vec<u8>,
    tx_bytes: Vec<u8>,
    flags: u32,
}

fn spending_tx(script_sig: ScriptBuf) -> Transaction {
    Transaction {
        version: Version(2),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::from_byte_array([0x55; 32]),
                vout: 0,
            },
            script_sig,
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(49_000),
            script_pubkey: pay_to_pubkey_hash(&[0x99; 20]),
        }],
    }
}

fn push_script(elements: &[Vec<u8>]) -> ScriptBuf {
    let mut builder = Builder::new();
    for element in elements {
        let push = PushBytesBuf::try_from(element.clone()).expect("pushable element");
        builder = builder.push_slice(push);
    }
    builder.into_script()
}

fn legacy_p2pkh_case() -> BenchCase {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[0x42; 32]).expect("valid key");
    let public = PublicKey::from_secret_key(&secp, &secret);
    let pubkey_hash = hash160::Hash::hash(&public.serialize()).to_byte_array();
    let script_pubkey = pay_to_pubkey_hash(&pubkey_hash);

    let mut tx = spending_tx(ScriptBuf::new());
    let digest =
        script_consensus::legacy_signature_hash(&tx, 0, &script_pubkey, SIGHASH_ALL);
    let message = Message::from_digest(digest.to_byte_array());
    let mut sig = secp.sign_ecdsa(&message, &secret).serialize_der().to_vec();
    sig.push(SIGHASH_ALL as u8);
    tx.input[0].script_sig = push_script(&[sig, public.serialize().to_vec()]);

    BenchCase {
        name: "p2pkh",
        script_pubkey: script_pubkey.into_bytes(),
        tx_bytes: consensus::serialize(&tx),
        flags: STANDARD_VERIFY_FLAGS,
    }
}

fn data_script_case() -> BenchCase {
    // A pure stack workout: no signatures involved.
    let mut script = Vec::new();
    for _ in 0..40 {
        script.extend_from_slice(&[0x51, 0x52, 0x93, 0x76, 0x87, 0x69]);
    }
    script.push(0x51);
    let tx = spending_tx(ScriptBuf::new());

    BenchCase {
        name: "arithmetic",
        script_pubkey: script,
        tx_bytes: consensus::serialize(&tx),
        flags: VERIFY_NONE,
    }
}

pub fn verification_bench(c: &mut Criterion) {
    let cases = vec![legacy_p2pkh_case(), data_script_case()];

    let mut group = c.benchmark_group("verify");
    for case in &cases {
        group.bench_function(case.name, |b| {
            b.iter(|| {
                verify_spend(&case.script_pubkey, 50_000, &case.tx_bytes, 0, case.flags)
                    .expect("bench case verifies")
            });
        });
    }
    group.finish();
}

pub fn classifier_bench(c: &mut Criterion) {
    let keys: Vec<Vec<u8>> = (1..=3u8)
        .map(|n| {
            let mut key = vec![n; 33];
            key[0] = 0x02;
            key
        })
        .collect();
    let scripts = vec![
        pay_to_pubkey_hash(&[0x10; 20]),
        multisig_script(2, &keys).expect("2-of-3"),
    ];

    c.bench_function("classify", |b| {
        b.iter(|| {
            for script in &scripts {
                criterion::black_box(classify(script));
            }
        });
    });
}

criterion_group!(benches, verification_bench, classifier_bench);
criterion_main!(benches);
