//! Host-port allocation over an agent's `[min, max)` range.

use std::collections::BTreeSet;

use crate::error::{BrokerError, Result};

/// Smallest port in `[min, max)` that is not already allocated.
pub fn next_port(allocated: &BTreeSet<u16>, min: u16, max: u16) -> Result<u16> {
    (min..max)
        .find(|port| !allocated.contains(port))
        .ok_or(BrokerError::RangeExhausted { min, max })
}

/// Remove `port` from the allocation set. Absent ports are ignored.
pub fn release_port(allocated: &mut BTreeSet<u16>, port: u16) {
    allocated.remove(&port);
}

/// Reserve `count` ports at once, failing without side effects if the range runs out.
pub fn reserve_ports(
    allocated: &BTreeSet<u16>,
    min: u16,
    max: u16,
    count: usize,
) -> Result<(BTreeSet<u16>, Vec<u16>)> {
    let mut updated = allocated.clone();
    let mut reserved = Vec::with_capacity(count);
    for _ in 0..count {
        let port = next_port(&updated, min, max)?;
        updated.insert(port);
        reserved.push(port);
    }
    Ok((updated, reserved))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_allocation_until_exhausted() {
        let mut allocated = BTreeSet::new();

        let first = next_port(&allocated, 1000, 1002).unwrap();
        allocated.insert(first);
        let second = next_port(&allocated, 1000, 1002).unwrap();
        allocated.insert(second);

        assert_eq!((first, second), (1000, 1001));
        assert!(matches!(
            next_port(&allocated, 1000, 1002),
            Err(BrokerError::RangeExhausted { min: 1000, max: 1002 })
        ));
    }

    #[test]
    fn test_returns_smallest_gap() {
        let allocated: BTreeSet<u16> = [5000, 5001, 5003].into_iter().collect();
        assert_eq!(next_port(&allocated, 5000, 5010).unwrap(), 5002);
    }

    #[test]
    fn test_released_port_is_reused() {
        let mut allocated: BTreeSet<u16> = [1000, 1001].into_iter().collect();
        release_port(&mut allocated, 1000);
        assert_eq!(next_port(&allocated, 1000, 1002).unwrap(), 1000);

        release_port(&mut allocated, 4242);
        assert_eq!(allocated.len(), 1);
    }

    #[test]
    fn test_empty_range_is_exhausted() {
        assert!(next_port(&BTreeSet::new(), 1000, 1000).is_err());
    }

    #[test]
    fn test_reserve_is_all_or_nothing() {
        let allocated: BTreeSet<u16> = [1000].into_iter().collect();

        let (updated, reserved) = reserve_ports(&allocated, 1000, 1003, 2).unwrap();
        assert_eq!(reserved, vec![1001, 1002]);
        assert_eq!(updated.len(), 3);

        assert!(reserve_ports(&allocated, 1000, 1003, 3).is_err());
        assert_eq!(allocated.len(), 1);
    }
}
