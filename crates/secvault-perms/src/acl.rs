//! Checks against a document's embedded access control list.

use secvault_core::{AclEntry, EntityId, Permission, Purpose, Timestamp};

/// The first ACL entry that lets `requester` read `fields` for `purpose` at
/// `now`, if any.
///
/// An entry matches when it names the requester, includes
/// [`Permission::Read`], covers every requested field, carries no purpose
/// or the requested one, and its window contains `now`.
pub fn matching_entry<'a>(
    acl: &'a [AclEntry],
    requester: &EntityId,
    fields: &[String],
    purpose: &Purpose,
    now: Timestamp,
) -> Option<&'a AclEntry> {
    acl.iter().find(|entry| {
        entry.entity == *requester
            && entry.permissions.contains(Permission::Read)
            && entry.fields.covers(fields)
            && entry.purpose.as_ref().map_or(true, |p| p == purpose)
            && entry.is_active_at(now)
    })
}
