//! Maven version ordering
//!
//! Follows `ComparableVersion`: versions tokenize on `.`, `-`, and
//! digit/letter transitions; numeric tokens compare numerically and
//! qualifiers in the fixed order alpha < beta < milestone < rc <
//! snapshot < release < sp, with unknown qualifiers after `sp` in
//! lexical order. Trailing null tokens (`0`, the empty qualifier,
//! `final`, `ga`) are trimmed, so `1.0` equals `1`.

use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Num(u64),
    Qual(String),
}

/// Rank in the fixed qualifier order; `None` for unknown qualifiers
fn qualifier_rank(q: &str) -> Option<u8> {
    Some(match q {
        "alpha" => 0,
        "beta" => 1,
        "milestone" => 2,
        "rc" => 3,
        "snapshot" => 4,
        "" => 5,
        "sp" => 6,
        _ => return None,
    })
}

fn normalize_qualifier(q: &str, followed_by_digit: bool) -> String {
    match q {
        "ga" | "final" | "release" => String::new(),
        "cr" => "rc".to_string(),
        // single letters directly before a number are shorthand
        "a" if followed_by_digit => "alpha".to_string(),
        "b" if followed_by_digit => "beta".to_string(),
        "m" if followed_by_digit => "milestone".to_string(),
        other => other.to_string(),
    }
}

fn tokenize(v: &str) -> Vec<Token> {
    let v = v.to_ascii_lowercase();
    let mut raw: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut prev_digit: Option<bool> = None;
    for c in v.chars() {
        if c == '.' || c == '-' {
            raw.push(std::mem::take(&mut cur));
            prev_digit = None;
            continue;
        }
        let digit = c.is_ascii_digit();
        if let Some(p) = prev_digit {
            if p != digit {
                raw.push(std::mem::take(&mut cur));
            }
        }
        cur.push(c);
        prev_digit = Some(digit);
    }
    raw.push(cur);

    let mut out = Vec::new();
    for (i, piece) in raw.iter().enumerate() {
        if piece.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            out.push(Token::Num(piece.parse().unwrap_or(u64::MAX)));
        } else {
            let followed_by_digit = raw
                .get(i + 1)
                .and_then(|n| n.chars().next())
                .is_some_and(|c| c.is_ascii_digit());
            out.push(Token::Qual(normalize_qualifier(piece, followed_by_digit)));
        }
    }

    // trim trailing null tokens so 1.0 == 1 == 1.0-ga
    loop {
        match out.last() {
            Some(Token::Num(0)) => out.pop(),
            Some(Token::Qual(q)) if q.is_empty() => out.pop(),
            _ => break,
        };
    }
    out
}

fn cmp_token(a: &Token, b: &Token) -> Ordering {
    match (a, b) {
        (Token::Num(x), Token::Num(y)) => x.cmp(y),
        // numbers are newer than any qualifier
        (Token::Num(_), Token::Qual(_)) => Ordering::Greater,
        (Token::Qual(_), Token::Num(_)) => Ordering::Less,
        (Token::Qual(x), Token::Qual(y)) => match (qualifier_rank(x), qualifier_rank(y)) {
            (Some(rx), Some(ry)) => rx.cmp(&ry),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => x.cmp(y),
        },
    }
}

/// A missing token compares as the null token of the other's kind
fn null_for(other: &Token) -> Token {
    match other {
        Token::Num(_) => Token::Num(0),
        Token::Qual(_) => Token::Qual(String::new()),
    }
}

/// Total order over Maven version strings
pub fn compare(a: &str, b: &str) -> Ordering {
    let ta = tokenize(a);
    let tb = tokenize(b);
    let len = ta.len().max(tb.len());
    for i in 0..len {
        let ord = match (ta.get(i), tb.get(i)) {
            (Some(x), Some(y)) => cmp_token(x, y),
            (Some(x), None) => cmp_token(x, &null_for(x)),
            (None, Some(y)) => cmp_token(&null_for(y), y),
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
