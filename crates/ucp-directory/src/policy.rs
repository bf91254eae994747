//! Access-control list evaluation.
//!
//! An access list is a sequence of [`Identity`] values. A caller matches when the list contains
//! the caller's own dn, a group the caller is a direct member of, or [`Identity::Everybody`].
//! A caller without a user only matches [`Identity::Anonymous`]. Group membership is not
//! transitive.

use crate::{directory::Directory, dn::DistinguishedName, identity::Identity, user::User, Result};

/// Returns true when `candidate` designates the owner of `own` who belongs to `group_dns`.
#[must_use]
pub fn identity_matches(
    candidate: &Identity,
    own: &DistinguishedName,
    group_dns: &[DistinguishedName],
) -> bool {
    match candidate {
        Identity::Everybody => true,
        Identity::Anonymous => false,
        Identity::Dn(dn) => dn == own || group_dns.contains(dn),
    }
}

/// Evaluates `candidates` for `user`.
///
/// Group membership is only fetched when neither `Everybody` nor the user's own dn already
/// matched, and at most once per call.
///
/// # Errors
///
/// Propagates directory failures from the group lookup.
pub async fn matches_any(
    directory: &Directory,
    candidates: &[Identity],
    user: Option<&User>,
) -> Result<bool> {
    let Some(user) = user else {
        return Ok(candidates.contains(&Identity::Anonymous));
    };

    if candidates
        .iter()
        .any(|candidate| identity_matches(candidate, &user.dn, &[]))
    {
        return Ok(true);
    }
    if candidates.iter().all(|candidate| candidate.dn().is_none()) {
        return Ok(false);
    }

    let group_dns = user.get_group_dns(directory).await?;
    Ok(candidates
        .iter()
        .any(|candidate| identity_matches(candidate, &user.dn, &group_dns)))
}
