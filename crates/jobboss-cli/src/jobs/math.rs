use jobboss_sched::{Resource, arg};
use serde_json::json;

pub(super) fn resource() -> Resource {
    Resource::new().action("is_prime?", |args| {
        let n: i64 = arg(args, 0)?;
        Ok(json!(is_prime(n)))
    })
}

fn is_prime(n: i64) -> bool {
    if n < 2 {
        return false;
    }
    (2..).take_while(|&d| within_root(d, n)).all(|d| n % d != 0)
}

/// `d * d <= n` without overflowing near `i64::MAX`.
fn within_root(d: i64, n: i64) -> bool {
    d <= n / d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_prime() {
        let primes: Vec<i64> = (0..=20).filter(|&n| is_prime(n)).collect();
        assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19]);
        assert!(!is_prime(-7));
        assert!(is_prime(2_147_483_647));
        assert!(!is_prime(i64::MAX));
    }

    #[test]
    fn test_root_bound_near_max() {
        assert!(within_root(3_037_000_499, i64::MAX));
        assert!(!within_root(3_037_000_500, i64::MAX));
        assert!(within_root(3, 9));
        assert!(!within_root(4, 15));
    }
}
