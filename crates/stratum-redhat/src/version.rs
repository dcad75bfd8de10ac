//! rpm EVR ordering
//!
//! Versions are `[epoch:]version[-release]`. Segments are runs of
//! digits or letters; digits beat letters, `~` sorts before everything
//! (pre-release), `^` sorts after the bare version but before any longer
//! one (post-release snapshots). A missing release on either side makes
//! the release comparison a tie, so feeds that publish bare versions
//! still match.

use std::cmp::Ordering;

/// rpm's segment-wise comparison of one version fragment
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    loop {
        // skip separator characters
        while i < a.len() && !a[i].is_ascii_alphanumeric() && a[i] != b'~' && a[i] != b'^' {
            i += 1;
        }
        while j < b.len() && !b[j].is_ascii_alphanumeric() && b[j] != b'~' && b[j] != b'^' {
            j += 1;
        }

        // tilde: sorts before everything, including the end of string
        let at = i < a.len() && a[i] == b'~';
        let bt = j < b.len() && b[j] == b'~';
        match (at, bt) {
            (true, true) => {
                i += 1;
                j += 1;
                continue;
            }
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        // caret: newer than the bare string, older than anything longer
        let ac = i < a.len() && a[i] == b'^';
        let bc = j < b.len() && b[j] == b'^';
        match (ac, bc) {
            (true, true) => {
                i += 1;
                j += 1;
                continue;
            }
            (true, false) => return if j >= b.len() { Ordering::Greater } else { Ordering::Less },
            (false, true) => return if i >= a.len() { Ordering::Less } else { Ordering::Greater },
            (false, false) => {}
        }

        if i >= a.len() || j >= b.len() {
            break;
        }

        // take a run of digits or a run of letters
        let a_digit = a[i].is_ascii_digit();
        let start_i = i;
        while i < a.len()
            && (if a_digit {
                a[i].is_ascii_digit()
            } else {
                a[i].is_ascii_alphabetic()
            })
        {
            i += 1;
        }
        let b_digit = b[j].is_ascii_digit();
        let start_j = j;
        while j < b.len()
            && (if b_digit {
                b[j].is_ascii_digit()
            } else {
                b[j].is_ascii_alphabetic()
            })
        {
            j += 1;
        }

        // a numeric segment always beats an alphabetic one
        if a_digit != b_digit {
            return if a_digit { Ordering::Greater } else { Ordering::Less };
        }

        let sa = &a[start_i..i];
        let sb = &b[start_j..j];
        let ord = if a_digit {
            let sa = trim_zeros(sa);
            let sb = trim_zeros(sb);
            sa.len().cmp(&sb.len()).then_with(|| sa.cmp(sb))
        } else {
            sa.cmp(sb)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    // equal prefixes: whoever has segments left is newer
    let a_left = i < a.len();
    let b_left = j < b.len();
    match (a_left, b_left) {
        (false, false) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
    }
}

fn trim_zeros(s: &[u8]) -> &[u8] {
    let n = s.iter().take_while(|&&c| c == b'0').count();
    &s[n.min(s.len().saturating_sub(1))..]
}

fn split_evr(evr: &str) -> (u64, &str, &str) {
    let (epoch, rest) = match evr.split_once(':') {
        Some((e, rest)) if e.chars().all(|c| c.is_ascii_digit()) && !e.is_empty() => {
            (e.parse().unwrap_or(0), rest)
        }
        _ => (0, evr),
    };
    match rest.rsplit_once('-') {
        Some((version, release)) => (epoch, version, release),
        None => (epoch, rest, ""),
    }
}

/// Total order over `epoch:version-release` strings
pub fn compare(a: &str, b: &str) -> Ordering {
    let (ae, av, ar) = split_evr(a);
    let (be, bv, br) = split_evr(b);
    ae.cmp(&be)
        .then_with(|| rpmvercmp(av, bv))
        .then_with(|| {
            // a side publishing no release leaves the release undecided
            if ar.is_empty() || br.is_empty() {
                Ordering::Equal
            } else {
                rpmvercmp(ar, br)
            }
        })
}

/// True when an installed EVR sorts before the fixed one
pub fn is_older(installed: &str, fixed: &str) -> bool {
    compare(installed, fixed) == Ordering::Less
}
