//! Device ordering and device↔account matching.
//!
//! A device's display name doubles as a lightweight durable record of "who is
//! logged in here": after a successful login the machine renames the device
//! to `"{username} {Platform}"`, so a later run can reconcile a possibly
//! stale fleet against a fresh account list just by re-reading names. A
//! device claiming an account we do not know is never driven further, since
//! it may hold a real person's session.

use regex::Regex;

use crate::account::AccountRecord;
use crate::client::Device;
use crate::config::Platform;

/// Per-device outcome of name-based verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    /// Device is already authenticated as the account it should run.
    Matched,
    /// Device is authenticated as a different, unexpected account.
    Mismatched { reason: String },
    /// No account signal on the device.
    Clean,
}

/// A device together with its verification outcome and (possibly) an account.
#[derive(Debug, Clone)]
pub struct DeviceAssignment {
    pub device: Device,
    pub ordinal: u64,
    pub verification: VerificationResult,
    pub account: Option<AccountRecord>,
    /// Name of the mismatched device this account was originally expected
    /// on, when the assignment came from a backup swap.
    pub swapped_from: Option<String>,
}

/// A mismatched device, excluded from the run.
#[derive(Debug, Clone)]
pub struct MismatchedDevice {
    pub device: Device,
    pub reason: String,
}

/// An account displaced by a mismatched device, awaiting a backup.
#[derive(Debug, Clone)]
pub struct DisplacedAccount {
    pub account: AccountRecord,
    pub expected_device: String,
}

/// Result of verifying a fleet against an account list.
#[derive(Debug, Default)]
pub struct AssignmentPlan {
    /// Devices that will run, each with exactly one account (or none for a
    /// matched device whose account is implied by its name).
    pub assigned: Vec<DeviceAssignment>,
    /// Devices stopped and excluded from the run.
    pub mismatched: Vec<MismatchedDevice>,
    /// Spare clean devices, in ordinal order.
    pub backups: Vec<Device>,
    /// Accounts whose expected device was mismatched; consumed by `reassign`.
    pub displaced: Vec<DisplacedAccount>,
    /// Accounts that could not be placed anywhere this run.
    pub pending: Vec<AccountRecord>,
}

/// Integer suffix of a serial identifier; non-numeric or missing suffixes
/// sort as 0.
pub fn serial_ordinal(serial: &str) -> u64 {
    let digits: String = serial
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().unwrap_or(0)
}

/// Sort devices by serial-suffix ordinal. The sort is stable, so given the
/// same fleet the order is identical across runs.
pub fn order_devices(devices: &mut [Device]) {
    devices.sort_by_key(|d| serial_ordinal(&d.serial));
}

/// Parse a display name against the `"{username} {Platform}"` convention.
pub fn parse_device_name<'a>(name: &'a str, platform: Platform) -> Option<&'a str> {
    // Built per call; verification runs once per fleet fetch.
    let re = Regex::new(&format!(
        r"^([A-Za-z0-9._]+) {}$",
        regex::escape(&platform.to_string())
    ))
    .ok()?;
    re.captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Verify a fleet against the run's account list.
///
/// First pass: trust display names. A device named for an account we hold is
/// `Matched` (the account is consumed); a device named for an unknown or
/// already-consumed account is `Mismatched`; anything else is `Clean`.
///
/// Second pass: remaining accounts are paired with the remaining non-matched
/// devices in ordinal order. A clean partner takes the account directly; a
/// mismatched partner displaces the account for `reassign`. Clean devices
/// left over become backups.
pub fn verify(
    mut devices: Vec<Device>,
    accounts: Vec<AccountRecord>,
    platform: Platform,
) -> AssignmentPlan {
    order_devices(&mut devices);

    let mut remaining: Vec<Option<AccountRecord>> = accounts.into_iter().map(Some).collect();
    let mut plan = AssignmentPlan::default();

    // (device, ordinal, parsed outcome) for the second pass.
    let mut unmatched: Vec<(Device, u64, Option<String>)> = Vec::new();

    for device in devices {
        let ordinal = serial_ordinal(&device.serial);
        match parse_device_name(&device.name, platform) {
            Some(username) => {
                let slot = remaining
                    .iter_mut()
                    .find(|a| a.as_ref().is_some_and(|a| a.username == username));
                match slot {
                    Some(slot) => {
                        let account = slot.take();
                        plan.assigned.push(DeviceAssignment {
                            device,
                            ordinal,
                            verification: VerificationResult::Matched,
                            account,
                            swapped_from: None,
                        });
                    }
                    None => {
                        let reason = format!(
                            "device claims account '{username}' which is not in this run's account list"
                        );
                        unmatched.push((device, ordinal, Some(reason)));
                    }
                }
            }
            None => unmatched.push((device, ordinal, None)),
        }
    }

    // Second pass: ordinal pairing of leftover accounts with non-matched
    // devices. Mismatched devices still occupy their slot so the pairing
    // stays stable across runs; their account is displaced, not reassigned
    // in place.
    let mut leftover = remaining.into_iter().flatten();
    for (device, ordinal, mismatch_reason) in unmatched {
        match mismatch_reason {
            Some(reason) => {
                if let Some(account) = leftover.next() {
                    plan.displaced.push(DisplacedAccount {
                        account,
                        expected_device: device.name.clone(),
                    });
                }
                plan.mismatched.push(MismatchedDevice { device, reason });
            }
            None => match leftover.next() {
                Some(account) => plan.assigned.push(DeviceAssignment {
                    device,
                    ordinal,
                    verification: VerificationResult::Clean,
                    account: Some(account),
                    swapped_from: None,
                }),
                None => plan.backups.push(device),
            },
        }
    }

    plan.pending.extend(leftover);
    plan
}

/// Re-home displaced accounts onto backup devices, in ordinal order.
///
/// Accounts that exhaust the backup supply move to `pending` and are skipped
/// for this run; they are never forced onto a wrong device.
pub fn reassign(plan: &mut AssignmentPlan) {
    let displaced = std::mem::take(&mut plan.displaced);
    for DisplacedAccount {
        account,
        expected_device,
    } in displaced
    {
        if plan.backups.is_empty() {
            plan.pending.push(account);
            continue;
        }
        let device = plan.backups.remove(0);
        let ordinal = serial_ordinal(&device.serial);
        plan.assigned.push(DeviceAssignment {
            device,
            ordinal,
            verification: VerificationResult::Clean,
            account: Some(account),
            swapped_from: Some(expected_device),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, name: &str, serial: &str) -> Device {
        Device {
            id: id.to_string(),
            name: name.to_string(),
            serial: serial.to_string(),
        }
    }

    fn account(username: &str) -> AccountRecord {
        serde_json::from_str(&format!(
            r#"{{"username": "{username}", "password": "pw"}}"#
        ))
        .unwrap()
    }

    #[test]
    fn serial_suffix_parsing() {
        assert_eq!(serial_ordinal("emu-042"), 42);
        assert_eq!(serial_ordinal("emu7"), 7);
        assert_eq!(serial_ordinal("no-digits"), 0);
        assert_eq!(serial_ordinal(""), 0);
    }

    #[test]
    fn ordering_is_monotonic_and_stable() {
        let mut devices = vec![
            device("a", "A", "emu-9"),
            device("b", "B", "emu-2"),
            device("c", "C", "broken"),
            device("d", "D", "also-broken"),
        ];
        order_devices(&mut devices);
        let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
        // Both zero-suffix devices keep their relative input order.
        assert_eq!(ids, vec!["c", "d", "b", "a"]);

        // Repeated calls on an unchanged input produce the same order.
        let snapshot: Vec<String> = devices.iter().map(|d| d.id.clone()).collect();
        order_devices(&mut devices);
        let again: Vec<String> = devices.iter().map(|d| d.id.clone()).collect();
        assert_eq!(snapshot, again);
    }

    #[test]
    fn name_parsing_follows_convention() {
        assert_eq!(
            parse_device_name("alice Instagram", Platform::Instagram),
            Some("alice")
        );
        assert_eq!(parse_device_name("Device3", Platform::Instagram), None);
        assert_eq!(
            parse_device_name("alice Instagram", Platform::TikTok),
            None
        );
        assert_eq!(
            parse_device_name("alice bob Instagram", Platform::Instagram),
            None
        );
    }

    #[test]
    fn alice_bob_device3_scenario() {
        let devices = vec![
            device("d1", "alice Instagram", "emu-1"),
            device("d2", "bob Instagram", "emu-2"),
            device("d3", "Device3", "emu-3"),
        ];
        let accounts = vec![account("alice"), account("carol")];

        let mut plan = verify(devices, accounts, Platform::Instagram);
        reassign(&mut plan);

        let alice = plan
            .assigned
            .iter()
            .find(|a| a.device.id == "d1")
            .unwrap();
        assert_eq!(alice.verification, VerificationResult::Matched);

        assert_eq!(plan.mismatched.len(), 1);
        assert_eq!(plan.mismatched[0].device.id, "d2");
        assert!(plan.mismatched[0].reason.contains("bob"));

        let carol = plan
            .assigned
            .iter()
            .find(|a| a.device.id == "d3")
            .unwrap();
        assert_eq!(carol.verification, VerificationResult::Clean);
        assert_eq!(carol.account.as_ref().unwrap().username, "carol");

        assert!(plan.pending.is_empty());
        assert!(plan.backups.is_empty());
    }

    #[test]
    fn verify_is_idempotent_on_corrected_names() {
        // Simulate the post-run fleet: every assigned device renamed to its
        // account's convention name.
        let devices = vec![
            device("d1", "alice Instagram", "emu-1"),
            device("d2", "carol Instagram", "emu-2"),
        ];
        let accounts = vec![account("alice"), account("carol")];

        let plan = verify(devices, accounts, Platform::Instagram);
        assert_eq!(plan.assigned.len(), 2);
        assert!(plan
            .assigned
            .iter()
            .all(|a| a.verification == VerificationResult::Matched));
        assert!(plan.mismatched.is_empty());
        assert!(plan.pending.is_empty());
    }

    #[test]
    fn duplicate_claim_is_mismatched() {
        let devices = vec![
            device("d1", "alice Instagram", "emu-1"),
            device("d2", "alice Instagram", "emu-2"),
        ];
        let accounts = vec![account("alice")];

        let plan = verify(devices, accounts, Platform::Instagram);
        assert_eq!(plan.assigned.len(), 1);
        assert_eq!(plan.assigned[0].device.id, "d1");
        assert_eq!(plan.mismatched.len(), 1);
        assert_eq!(plan.mismatched[0].device.id, "d2");
    }

    #[test]
    fn reassign_never_doubles_up_backups() {
        let devices = vec![
            device("d1", "ghost1 Instagram", "emu-1"),
            device("d2", "ghost2 Instagram", "emu-2"),
            device("d3", "SpareA", "emu-3"),
        ];
        let accounts = vec![account("eve"), account("mallory")];

        let mut plan = verify(devices, accounts, Platform::Instagram);
        assert_eq!(plan.displaced.len(), 2);
        assert_eq!(plan.backups.len(), 1);

        reassign(&mut plan);

        // One account re-homed onto the single backup, the other pending.
        let reassigned: Vec<_> = plan
            .assigned
            .iter()
            .filter(|a| a.swapped_from.is_some())
            .collect();
        assert_eq!(reassigned.len(), 1);
        assert_eq!(reassigned[0].device.id, "d3");
        assert_eq!(plan.pending.len(), 1);
        assert!(plan.backups.is_empty());

        // No backup device carries more than one account.
        let mut seen = std::collections::HashSet::new();
        for a in &plan.assigned {
            assert!(seen.insert(a.device.id.clone()));
        }
    }

    #[test]
    fn ordinal_pairing_keeps_accounts_on_their_slots() {
        // D2 is mismatched; the account its slot would have taken is
        // displaced, while the later account stays on its own clean device.
        let devices = vec![
            device("d1", "alice Instagram", "emu-1"),
            device("d2", "intruder Instagram", "emu-2"),
            device("d3", "Clean3", "emu-3"),
            device("d4", "Clean4", "emu-4"),
        ];
        let accounts = vec![account("alice"), account("carol"), account("dave")];

        let mut plan = verify(devices, accounts, Platform::Instagram);
        let dave = plan
            .assigned
            .iter()
            .find(|a| a.account.as_ref().map(|x| x.username.as_str()) == Some("dave"))
            .unwrap();
        assert_eq!(dave.device.id, "d3");

        reassign(&mut plan);
        let carol = plan
            .assigned
            .iter()
            .find(|a| a.account.as_ref().map(|x| x.username.as_str()) == Some("carol"))
            .unwrap();
        assert_eq!(carol.device.id, "d4");
        assert_eq!(carol.swapped_from.as_deref(), Some("intruder Instagram"));
    }
}
