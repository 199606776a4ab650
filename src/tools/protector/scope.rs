//! Scope items.
//!
//! A scope item is `name[+permissions]`, where permissions are any of `c`,
//! `r`, `u` and `d` (create, read, update, delete). An item without
//! permissions means `+r`. Names may contain letters and most printable
//! ASCII punctuation; a separator (`/` by default) introduces sub-scopes,
//! so `user+r` also grants `user/emails+r`. The name `*` matches every
//! scope.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

/// A grant covering every scope with every permission.
pub const ANY: &str = "*+crud";

const PERMISSIONS: &str = "crud";

static ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<item>(?:[^\W\d_]|[!#-*,-\[\]-~])+)(?:\+(?P<permissions>[crud]+))?$")
        .expect("valid regex")
});

fn parse(item: &str) -> Option<(&str, &str)> {
    let caps = ITEM.captures(item)?;
    let name = caps.name("item")?.as_str();
    let perms = caps.name("permissions").map_or("r", |m| m.as_str());
    Some((name, perms))
}

/// Expands scope items into one item per permission: `user+ud` becomes
/// `user+u` and `user+d`, `user` becomes `user+r`.
///
/// Malformed items are an [`Error::InvalidScope`] when `strict`, and
/// dropped otherwise.
pub fn normalize_scope_items<I, S>(items: I, strict: bool) -> Result<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized = BTreeSet::new();
    for item in items {
        let item = item.as_ref();
        match parse(item) {
            Some((name, perms)) => {
                normalized.extend(perms.chars().map(|p| format!("{name}+{p}")));
            }
            None if strict => return Err(Error::InvalidScope(item.to_owned())),
            None => {}
        }
    }
    Ok(normalized)
}

/// Whether `root` grants everything `child` asks for.
///
/// `root`'s permissions must include all of `child`'s, and `child` must name
/// the same scope as `root` or one of its sub-scopes.
pub fn check_encapsulates(root: &str, child: &str, sep: &str) -> bool {
    let (Some((root_name, root_perms)), Some((child_name, child_perms))) = (parse(root), parse(child)) else {
        return false;
    };
    if !child_perms.chars().all(|p| root_perms.contains(p)) {
        return false;
    }
    let root_name = root_name.strip_suffix(sep).unwrap_or(root_name);
    root_name == "*"
        || child_name == root_name
        || child_name
            .strip_prefix(root_name)
            .is_some_and(|rest| !sep.is_empty() && rest.starts_with(sep))
}

/// An equivalent, possibly smaller, list of items: permissions are merged
/// per name and sub-scopes already covered by a parent are dropped. Items
/// granting only `r` are written without permissions.
pub fn compress_scope_items<I, S>(items: I, sep: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut merged: BTreeMap<String, BTreeSet<char>> = BTreeMap::new();
    for item in items {
        if let Some((name, perms)) = parse(item.as_ref()) {
            merged.entry(name.to_owned()).or_default().extend(perms.chars());
        }
    }

    let covered = |name: &str, perms: &BTreeSet<char>| {
        let parts: Vec<&str> = name.split(sep).collect();
        (1..parts.len()).any(|i| {
            merged
                .get(&parts[..i].join(sep))
                .is_some_and(|parent| parent.is_superset(perms))
        })
    };

    merged
        .iter()
        .filter(|(name, perms)| !covered(name, perms))
        .map(|(name, perms)| {
            let perms: String = PERMISSIONS.chars().filter(|p| perms.contains(p)).collect();
            if perms == "r" { name.clone() } else { format!("{name}+{perms}") }
        })
        .collect()
}

/// The first granted item that encapsulates `required`.
///
/// Granted items are merged per name first, so `user+c` and `user+u`
/// together grant `user+cu`.
pub fn find_granting_scope<S: AsRef<str>>(required: &str, granted: &[S], sep: &str) -> Option<String> {
    let mut merged: Vec<(String, String)> = Vec::new();
    for item in granted {
        let Some((name, perms)) = parse(item.as_ref()) else { continue };
        match merged.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => {
                existing.extend(perms.chars().filter(|p| !existing.contains(*p)).collect::<Vec<_>>());
            }
            None => merged.push((name.to_owned(), perms.to_owned())),
        }
    }
    merged
        .into_iter()
        .map(|(name, perms)| format!("{name}+{perms}"))
        .find(|item| check_encapsulates(item, required, sep))
}
