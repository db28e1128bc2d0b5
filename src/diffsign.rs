//! Diff/sign glue (§4.6 steps 3-4): deciding whether an update needs a full
//! DNSSEC resign or only a partial one, and merging the user's changeset
//! with whatever the signer produced.

use bytes::Bytes;
use domain::base::{Name, Rtype};

use zonecore_content::{Changeset, MergeError, RegularRecord, Serial, ZoneContents};

use crate::contracts::{SignOutcome, SignSerialPolicy, Signer, SignerError};

/// Whether the apex's DNSKEY or NSEC3PARAM rrset changed between `old` and
/// `new`, whole-rrset, order-independent (§4.6 step 3).
pub fn needs_full_resign(old: &ZoneContents, new: &ZoneContents) -> bool {
    apex_rrset_changed(old, new, Rtype::DNSKEY) || apex_rrset_changed(old, new, Rtype::NSEC3PARAM)
}

fn apex_rrset_changed(old: &ZoneContents, new: &ZoneContents, rtype: Rtype) -> bool {
    let old_recs = old.apex_records_of_type(rtype);
    let new_recs = new.apex_records_of_type(rtype);
    if old_recs.len() != new_recs.len() {
        return true;
    }
    !rrsets_equal(&old_recs, &new_recs)
}

fn rrsets_equal(a: &[&RegularRecord], b: &[&RegularRecord]) -> bool {
    a.iter().all(|r| b.iter().any(|o| o.same_data(r)))
}

/// An error from the sign-and-merge step.
#[derive(Debug)]
pub enum DiffSignError {
    Signer(SignerError),
    /// The signer returned a changeset that does not chain onto the user
    /// changeset's `soa_to` — a signer contract violation.
    NotContiguous,
}

impl std::fmt::Display for DiffSignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffSignError::Signer(err) => write!(f, "{err}"),
            DiffSignError::NotContiguous => f.write_str("signer produced a non-contiguous changeset"),
        }
    }
}

impl std::error::Error for DiffSignError {}

impl From<SignerError> for DiffSignError {
    fn from(err: SignerError) -> Self {
        DiffSignError::Signer(err)
    }
}

impl From<MergeError> for DiffSignError {
    fn from(_: MergeError) -> Self {
        DiffSignError::NotContiguous
    }
}

/// Run the signer (if enabled) against `new_contents` and fold its output
/// into `user_changeset`, returning the final changeset to journal and the
/// signer's next-refresh instant, if any.
///
/// If DNSSEC is disabled for `zone`, this is a no-op that returns
/// `user_changeset` unchanged and no refresh instant.
pub fn sign_and_merge(
    signer: &dyn Signer,
    zone: &Name<Bytes>,
    old_contents: &ZoneContents,
    new_contents: &mut ZoneContents,
    user_changeset: Changeset,
    new_serial: Serial,
) -> Result<(Changeset, Option<u64>), DiffSignError> {
    if !signer.is_enabled(zone) {
        return Ok((user_changeset, None));
    }

    let outcome: SignOutcome = if needs_full_resign(old_contents, new_contents) {
        signer.sign_zone(zone, new_contents, SignSerialPolicy::Keep, new_serial)?
    } else {
        signer.sign_changeset(zone, new_contents, &user_changeset, SignSerialPolicy::Keep, new_serial)?
    };

    let merged = match &outcome.changeset {
        Some(signing) => user_changeset.merge(signing)?,
        None => user_changeset,
    };

    Ok((merged, Some(outcome.refresh_at_unix_secs)))
}
