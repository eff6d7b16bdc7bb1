use crate::models::{Device, DeviceRole};

/// Picks the camera/plotter pair out of a sweep.
///
/// Only hosts without a resolvable name are candidates; named hosts are taken
/// to be infrastructure such as the router. Candidates are ordered by address
/// and the first two that are numerically consecutive within the same /24 are
/// returned, lower address first as the camera. Returns either exactly two
/// devices or none.
///
/// Two unrelated unnamed hosts that happen to sit next to each other will be
/// paired all the same.
pub fn pair(devices: &[Device]) -> Vec<Device> {
    let mut candidates: Vec<&Device> = devices.iter().filter(|d| d.hostname.is_unknown()).collect();
    candidates.sort_by_key(|d| d.address);

    candidates
        .windows(2)
        .find(|w| is_adjacent(w[0], w[1]))
        .map(|w| {
            vec![
                w[0].clone().with_role(DeviceRole::Camera),
                w[1].clone().with_role(DeviceRole::Plotter),
            ]
        })
        .unwrap_or_default()
}

fn is_adjacent(lower: &Device, upper: &Device) -> bool {
    let a = lower.address.octets();
    let b = upper.address.octets();
    a[..3] == b[..3] && b[3].checked_sub(a[3]) == Some(1)
}
