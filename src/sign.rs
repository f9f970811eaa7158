//! Combination of partial unlocking scripts.
//!
//! Multi-party signing flows produce several incomplete unlocking scripts for
//! the same output; [`combine_signatures`] merges two of them into the most
//! complete one. Completeness is judged per locking-script template: for
//! multisignature outputs the signatures are re-matched to public keys through
//! the checker so the merged script carries them in key order.

use bitcoin::blockdata::script::{Builder, PushBytesBuf, Script, ScriptBuf};

use crate::checker::{BaseSignatureChecker, SignatureChecker};
use crate::script::{eval_script, SigVersion, Stack, VerifyFlags};
use crate::standard::{classify, TemplateKind};

/// Redeem-script layers the combiner is willing to unwrap. Nesting depth is
/// attacker-influenced input, so the walk is a bounded loop.
const MAX_REDEEM_SCRIPT_DEPTH: usize = 4;

/// Merges two candidate unlocking scripts for `script_pubkey` into the most
/// complete single unlocking script.
///
/// `checker` must be bound to the spending transaction and input the
/// signatures were produced for; it is consulted to re-derive which public
/// key each multisig signature belongs to.
pub fn combine_signatures<C: SignatureChecker>(
    script_pubkey: &Script,
    checker: &C,
    script_sig1: &Script,
    script_sig2: &Script,
) -> ScriptBuf {
    let mut stack1 = stack_elements(script_sig1);
    let mut stack2 = stack_elements(script_sig2);

    // Unwrap script-hash layers first: the trailing stack element of each
    // candidate is the serialized redeem script, which becomes the effective
    // locking script one level down.
    let mut current_pubkey = script_pubkey.to_owned();
    let mut template = classify(&current_pubkey);
    let mut redeem_layers: Vec<Vec<u8>> = Vec::new();

    let combined = loop {
        match template.kind {
            TemplateKind::ScriptHash if redeem_layers.len() < MAX_REDEEM_SCRIPT_DEPTH => {
                if stack1.last().map(|last| last.is_empty()).unwrap_or(true) {
                    break push_all(&stack2);
                }
                if stack2.last().map(|last| last.is_empty()).unwrap_or(true) {
                    break push_all(&stack1);
                }
                let redeem = stack1.pop().expect("candidate checked non-empty");
                stack2.pop();
                current_pubkey = ScriptBuf::from_bytes(redeem.clone());
                template = classify(&current_pubkey);
                redeem_layers.push(redeem);
            }
            TemplateKind::PubKey | TemplateKind::PubKeyHash => {
                // A signature beats a placeholder or nothing at all.
                if stack1.first().map(|sig| sig.is_empty()).unwrap_or(true) {
                    break push_all(&stack2);
                }
                break push_all(&stack1);
            }
            TemplateKind::MultiSig => {
                break combine_multisig(&current_pubkey, checker, &stack1, &stack2);
            }
            _ => {
                // Unknown shape: prefer whichever candidate carries more,
                // ties toward the first.
                if stack1.len() >= stack2.len() {
                    break push_all(&stack1);
                }
                break push_all(&stack2);
            }
        }
    };

    // Re-append the serialized redeem scripts, innermost first.
    let mut result = combined.into_bytes();
    for redeem in redeem_layers.iter().rev() {
        let mut builder = Builder::new();
        if let Ok(push) = PushBytesBuf::try_from(redeem.clone()) {
            builder = builder.push_slice(push);
        }
        result.extend_from_slice(builder.into_script().as_bytes());
    }
    ScriptBuf::from_bytes(result)
}

/// Evaluates an unlocking script to its stack elements. Partial results are
/// kept on error; a malformed candidate simply contributes less.
fn stack_elements(script_sig: &Script) -> Vec<Vec<u8>> {
    let mut stack = Stack::new();
    let _ = eval_script(
        &mut stack,
        script_sig,
        VerifyFlags::NONE,
        &BaseSignatureChecker,
        SigVersion::Base,
    );
    stack.into_items()
}

fn push_all(values: &[Vec<u8>]) -> ScriptBuf {
    let mut builder = Builder::new();
    for value in values {
        match PushBytesBuf::try_from(value.clone()) {
            Ok(push) => builder = builder.push_slice(push),
            Err(_) => return ScriptBuf::new(),
        }
    }
    builder.into_script()
}

fn combine_multisig<C: SignatureChecker>(
    script_pubkey: &Script,
    checker: &C,
    stack1: &[Vec<u8>],
    stack2: &[Vec<u8>],
) -> ScriptBuf {
    let template = classify(script_pubkey);
    let Some((required, _total)) = template.multisig_counts() else {
        return ScriptBuf::new();
    };
    let pubkeys = template.multisig_pubkeys();

    // Pool every signature present in either candidate.
    let mut all_sigs: Vec<&Vec<u8>> = Vec::new();
    for sig in stack1.iter().chain(stack2.iter()) {
        if !sig.is_empty() && !all_sigs.contains(&sig) {
            all_sigs.push(sig);
        }
    }

    // Re-derive which key each signature validates against.
    let mut matched: Vec<Option<&Vec<u8>>> = vec![None; pubkeys.len()];
    for sig in all_sigs {
        for (key_index, pubkey) in pubkeys.iter().enumerate() {
            if matched[key_index].is_some() {
                continue;
            }
            if checker.check_ecdsa_signature(sig, pubkey, script_pubkey, SigVersion::Base) {
                matched[key_index] = Some(sig);
                break;
            }
        }
    }

    // The dummy element, then up to `required` signatures in key order,
    // padding unmatched slots with empty placeholders.
    let mut elements: Vec<Vec<u8>> = vec![Vec::new()];
    let mut have = 0usize;
    for slot in matched {
        if have >= required as usize {
            break;
        }
        if let Some(sig) = slot {
            elements.push(sig.clone());
            have += 1;
        }
    }
    for _ in have..required as usize {
        elements.push(Vec::new());
    }

    push_all(&elements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard::pay_to_pubkey_hash;

    #[test]
    fn nonstandard_prefers_larger_stack_with_tie_to_first() {
        let script_pubkey = ScriptBuf::from_bytes(vec![0x51, 0x51]);
        let one = Builder::new().push_slice([0x01]).into_script();
        let two = Builder::new()
            .push_slice([0x01])
            .push_slice([0x02])
            .into_script();

        let combined = combine_signatures(&script_pubkey, &BaseSignatureChecker, &one, &two);
        assert_eq!(combined, two);

        let combined = combine_signatures(&script_pubkey, &BaseSignatureChecker, &two, &one);
        assert_eq!(combined, two);

        let tie = combine_signatures(&script_pubkey, &BaseSignatureChecker, &one, &one);
        assert_eq!(tie, one);
    }

    #[test]
    fn pubkey_hash_prefers_nonempty_signature() {
        let script_pubkey = pay_to_pubkey_hash(&[7u8; 20]);
        let unsigned = ScriptBuf::new();
        let signed = Builder::new()
            .push_slice([0xde, 0xad])
            .push_slice([0xbe, 0xef])
            .into_script();

        let combined =
            combine_signatures(&script_pubkey, &BaseSignatureChecker, &unsigned, &signed);
        assert_eq!(combined, signed);

        let combined =
            combine_signatures(&script_pubkey, &BaseSignatureChecker, &signed, &unsigned);
        assert_eq!(combined, signed);
    }
}
