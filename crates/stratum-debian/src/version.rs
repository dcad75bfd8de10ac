//! dpkg version ordering
//!
//! Versions are `[epoch:]upstream[-revision]`. Epochs compare
//! numerically; upstream and revision alternate non-digit and digit
//! spans, where `~` sorts before everything (including the end of the
//! string), letters sort before non-letters, and digit spans compare
//! numerically.

use std::cmp::Ordering;

/// Weight of one byte in a non-digit span; end-of-string weighs 0
fn order(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(b'~') => -1,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => c as i32 + 256,
    }
}

/// dpkg's fragment comparison, applied to upstream and revision alike
fn verrevcmp(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        // non-digit span
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit())
        {
            let x = if i < a.len() && !a[i].is_ascii_digit() {
                order(Some(a[i]))
            } else {
                order(None)
            };
            let y = if j < b.len() && !b[j].is_ascii_digit() {
                order(Some(b[j]))
            } else {
                order(None)
            };
            match x.cmp(&y) {
                Ordering::Equal => {}
                other => return other,
            }
            if i < a.len() && !a[i].is_ascii_digit() {
                i += 1;
            }
            if j < b.len() && !b[j].is_ascii_digit() {
                j += 1;
            }
        }

        // digit span: numeric with leading zeros ignored
        while i < a.len() && a[i] == b'0' {
            i += 1;
        }
        while j < b.len() && b[j] == b'0' {
            j += 1;
        }
        let mut first_diff = Ordering::Equal;
        while i < a.len() && a[i].is_ascii_digit() && j < b.len() && b[j].is_ascii_digit() {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }
        if i < a.len() && a[i].is_ascii_digit() {
            return Ordering::Greater;
        }
        if j < b.len() && b[j].is_ascii_digit() {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }
    Ordering::Equal
}

fn split(v: &str) -> (u64, &str, &str) {
    let (epoch, rest) = match v.split_once(':') {
        Some((e, rest)) if e.chars().all(|c| c.is_ascii_digit()) && !e.is_empty() => {
            (e.parse().unwrap_or(0), rest)
        }
        _ => (0, v),
    };
    match rest.rsplit_once('-') {
        Some((upstream, revision)) => (epoch, upstream, revision),
        None => (epoch, rest, ""),
    }
}

/// Total order over Debian version strings
pub fn compare(a: &str, b: &str) -> Ordering {
    let (ae, au, ar) = split(a);
    let (be, bu, br) = split(b);
    ae.cmp(&be)
        .then_with(|| verrevcmp(au, bu))
        .then_with(|| verrevcmp(ar, br))
}

/// True when an installed version sorts before the fixed one
pub fn is_older(installed: &str, fixed: &str) -> bool {
    compare(installed, fixed) == Ordering::Less
}
