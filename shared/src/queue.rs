//! Per-profile device queue
//!
//! A `ProfileQueue` holds the devices that have connected on one profile in
//! preference order (most recently connected first, tagged devices pinned at
//! the head) together with the bookkeeping needed to walk that list once per
//! connect trigger:
//!
//! - `cursor`: index of the next device to try
//! - `retry_count`: consecutive failures on the device under the cursor
//! - `available_to_connect`: cleared once the list is exhausted for this trigger
//! - `active_connections`: devices currently connected on the profile, counted
//!   from the records themselves

use crate::{ConnectionState, Device, DeviceRecord, PriorityError, PriorityTag, Profile};

/// Ordered device records and connection bookkeeping for one profile
#[derive(Debug, Clone)]
pub struct ProfileQueue {
    profile: Profile,
    max_connections: usize,
    records: Vec<DeviceRecord>,
    cursor: usize,
    retry_count: u32,
    available_to_connect: bool,
}

impl ProfileQueue {
    /// Create an empty queue for a profile
    pub fn new(profile: Profile, max_connections: usize) -> Self {
        Self {
            profile,
            max_connections,
            records: Vec::new(),
            cursor: 0,
            retry_count: 0,
            available_to_connect: true,
        }
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn active_connections(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state == ConnectionState::Connected)
            .count()
    }

    pub fn is_available_to_connect(&self) -> bool {
        self.available_to_connect
    }

    pub fn set_available_to_connect(&mut self, available: bool) {
        self.available_to_connect = available;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in preference order
    pub fn records(&self) -> &[DeviceRecord] {
        &self.records
    }

    /// Devices in preference order
    pub fn devices(&self) -> Vec<Device> {
        self.records.iter().map(|r| r.device.clone()).collect()
    }

    pub fn contains(&self, device: &Device) -> bool {
        self.position(device).is_some()
    }

    pub fn state_of(&self, device: &Device) -> Option<ConnectionState> {
        self.position(device).map(|p| self.records[p].state)
    }

    /// The device currently holding a priority tag
    pub fn device_with_tag(&self, tag: PriorityTag) -> Option<&Device> {
        self.records
            .iter()
            .find(|r| r.tag == Some(tag))
            .map(|r| &r.device)
    }

    /// Number of tagged devices, i.e. the size of the pinned head block
    pub fn tagged_count(&self) -> usize {
        self.records.iter().filter(|r| r.tag.is_some()).count()
    }

    /// The device in the middle of a connection attempt, if any
    pub fn connecting_device(&self) -> Option<&Device> {
        self.records
            .iter()
            .find(|r| r.state == ConnectionState::Connecting)
            .map(|r| &r.device)
    }

    pub fn connected_devices(&self) -> Vec<Device> {
        self.records
            .iter()
            .filter(|r| r.state == ConnectionState::Connected)
            .map(|r| r.device.clone())
            .collect()
    }

    fn position(&self, device: &Device) -> Option<usize> {
        self.records.iter().position(|r| r.device == *device)
    }

    /// Append a device if it is not already known. Returns true if added.
    pub fn add_device(&mut self, device: Device) -> bool {
        if self.contains(&device) {
            return false;
        }
        self.records.push(DeviceRecord::new(device));
        true
    }

    /// Remove a device (unbonded). Returns true if it was present.
    pub fn remove_device(&mut self, device: &Device) -> bool {
        let Some(position) = self.position(device) else {
            return false;
        };
        let record = self.records.remove(position);
        if record.tag == Some(PriorityTag::Primary) {
            self.untag(PriorityTag::Secondary);
        }
        if position < self.cursor {
            self.cursor -= 1;
        }
        self.cursor = self.cursor.min(self.records.len());
        true
    }

    /// Pin a device to the slot of `tag`, replacing the current holder.
    ///
    /// The device is added first if this profile has never seen it.
    pub fn set_priority(&mut self, device: Device, tag: PriorityTag) -> Result<(), PriorityError> {
        if tag == PriorityTag::Secondary {
            match self.device_with_tag(PriorityTag::Primary) {
                None => {
                    return Err(PriorityError::SecondaryWithoutPrimary {
                        profile: self.profile,
                    })
                }
                Some(primary) if *primary == device => {
                    return Err(PriorityError::AlreadyPrimary {
                        profile: self.profile,
                        device,
                    })
                }
                Some(_) => {}
            }
        }

        self.untag(tag);
        let position = match self.position(&device) {
            Some(position) => position,
            None => {
                self.records.push(DeviceRecord::new(device));
                self.records.len() - 1
            }
        };
        self.records[position].tag = Some(tag);
        self.pin_tagged();
        Ok(())
    }

    /// Clear a priority tag, returning the device that held it.
    ///
    /// Clearing Primary also clears Secondary. The untagged devices keep
    /// their current position.
    pub fn clear_priority(&mut self, tag: PriorityTag) -> Option<Device> {
        let position = self.records.iter().position(|r| r.tag == Some(tag))?;
        self.records[position].tag = None;
        if tag == PriorityTag::Primary {
            self.untag(PriorityTag::Secondary);
        }
        Some(self.records[position].device.clone())
    }

    fn untag(&mut self, tag: PriorityTag) {
        for record in self.records.iter_mut().filter(|r| r.tag == Some(tag)) {
            record.tag = None;
        }
    }

    /// Move tagged records to the head of the list, Primary first
    fn pin_tagged(&mut self) {
        let mut head = Vec::with_capacity(PriorityTag::ALL.len());
        for tag in PriorityTag::ALL {
            if let Some(position) = self.records.iter().position(|r| r.tag == Some(tag)) {
                head.push(self.records.remove(position));
            }
        }
        self.records.splice(0..0, head);
    }

    /// Whether another connection attempt may be made on this profile
    pub fn connectable(&self) -> bool {
        self.available_to_connect && self.active_connections() < self.max_connections
    }

    /// Next disconnected device at or after the cursor.
    ///
    /// Returns `None` once the list is exhausted and rewinds the cursor. The
    /// caller closes the profile for the rest of the trigger cycle.
    pub fn next_candidate(&mut self) -> Option<Device> {
        while self.cursor < self.records.len()
            && self.records[self.cursor].state != ConnectionState::Disconnected
        {
            self.cursor += 1;
        }
        match self.records.get(self.cursor) {
            Some(record) => Some(record.device.clone()),
            None => {
                self.cursor = 0;
                None
            }
        }
    }

    /// Mark a device as having a connect call in flight
    pub fn mark_connecting(&mut self, device: &Device) -> bool {
        match self.position(device) {
            Some(position) => {
                self.records[position].state = ConnectionState::Connecting;
                true
            }
            None => false,
        }
    }

    /// Put a device that is still marked Connecting back to Disconnected
    /// without touching the cursor or the retry count.
    pub fn cancel_connecting(&mut self, device: &Device) -> bool {
        match self.position(device) {
            Some(position) if self.records[position].state == ConnectionState::Connecting => {
                self.records[position].state = ConnectionState::Disconnected;
                true
            }
            _ => false,
        }
    }

    /// Record the outcome of a connection attempt or a profile state change
    pub fn record_outcome(&mut self, device: &Device, success: bool, retry_allowed: bool) {
        if success {
            self.record_success(device);
        } else {
            self.record_failure(device, retry_allowed);
        }
    }

    fn record_success(&mut self, device: &Device) {
        // A device connecting for the first time (e.g. right after pairing)
        // joins the list here.
        let position = match self.position(device) {
            // Repeated reports for a live connection change nothing
            Some(position) if self.records[position].state == ConnectionState::Connected => {
                return;
            }
            Some(position) => position,
            None => {
                self.records.push(DeviceRecord::new(device.clone()));
                self.records.len() - 1
            }
        };

        self.records[position].state = ConnectionState::Connected;
        self.retry_count = 0;
        self.promote(position);

        // Only move on when no other device on this profile is mid-attempt,
        // otherwise the device under the cursor would be skipped.
        if self.connecting_device().is_none() {
            self.advance_cursor();
        }
    }

    fn record_failure(&mut self, device: &Device, retry_allowed: bool) {
        let Some(position) = self.position(device) else {
            return;
        };

        self.records[position].state = ConnectionState::Disconnected;

        // Disconnects of other devices must not cost the in-flight device its retry
        if self.connecting_device().is_some() {
            return;
        }

        if retry_allowed {
            self.retry_count += 1;
        } else {
            self.retry_count = 0;
            self.advance_cursor();
        }
    }

    /// Move the record at `position` to the first slot after the tagged block.
    /// Tagged devices never move.
    fn promote(&mut self, position: usize) {
        if self.records[position].tag.is_some() {
            return;
        }
        let top = self.tagged_count();
        if position > top {
            let record = self.records.remove(position);
            self.records.insert(top, record);
        }
    }

    fn advance_cursor(&mut self) {
        self.cursor = (self.cursor + 1).min(self.records.len());
    }

    /// Re-arm the queue for a new connect trigger
    pub fn reset_for_new_trigger(&mut self) {
        self.available_to_connect = true;
        self.cursor = 0;
    }

    /// Forget all connection state (adapter turned off). Device order is kept.
    pub fn reset_all_connections(&mut self) {
        for record in &mut self.records {
            record.state = ConnectionState::Disconnected;
        }
        self.cursor = 0;
        self.retry_count = 0;
        self.available_to_connect = true;
    }

    /// Forget every device on this profile
    pub fn clear_devices(&mut self) {
        self.records.clear();
        self.reset_all_connections();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(n: u8) -> Device {
        Device::new(format!("DE:AD:BE:EF:00:{:02X}", n))
    }

    fn queue_with(profile_max: usize, devices: &[Device]) -> ProfileQueue {
        let mut queue = ProfileQueue::new(Profile::HandsFree, profile_max);
        for d in devices {
            queue.add_device(d.clone());
        }
        queue
    }

    fn assert_invariants(queue: &ProfileQueue) {
        assert!(queue.cursor() <= queue.len(), "cursor out of range");
        assert_eq!(queue.active_connections(), queue.connected_devices().len());

        let tags: Vec<Option<PriorityTag>> = queue.records().iter().map(|r| r.tag).collect();
        let tagged = queue.tagged_count();
        assert!(tags[..tagged].iter().all(Option::is_some), "tagged devices not at head");
        if tagged > 0 {
            assert_eq!(tags[0], Some(PriorityTag::Primary));
        }
        if tagged > 1 {
            assert_eq!(tags[1], Some(PriorityTag::Secondary));
        }
        assert!(tagged <= 2);
    }

    #[test]
    fn test_add_device_is_idempotent() {
        let mut queue = ProfileQueue::new(Profile::AudioSink, 1);
        assert!(queue.add_device(device(1)));
        assert!(!queue.add_device(Device::new("de:ad:be:ef:00:01")));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_happy_path_two_connections() {
        let (a, b) = (device(1), device(2));
        let mut queue = queue_with(2, &[a.clone(), b.clone()]);

        assert_eq!(queue.next_candidate(), Some(a.clone()));
        queue.record_outcome(&a, true, true);
        assert_eq!(queue.state_of(&a), Some(ConnectionState::Connected));
        assert_eq!(queue.active_connections(), 1);
        assert_eq!(queue.cursor(), 1);
        assert_invariants(&queue);

        assert!(queue.connectable());
        assert_eq!(queue.next_candidate(), Some(b.clone()));
        queue.record_outcome(&b, true, true);
        assert_eq!(queue.active_connections(), 2);
        assert_eq!(queue.cursor(), 2);
        assert!(!queue.connectable());
        assert_invariants(&queue);

        // Both connected: a new trigger finds nothing and rewinds
        queue.reset_for_new_trigger();
        assert_eq!(queue.next_candidate(), None);
        assert_eq!(queue.cursor(), 0);
        assert_invariants(&queue);
    }

    #[test]
    fn test_retry_then_give_up() {
        let a = device(1);
        let mut queue = queue_with(1, &[a.clone()]);

        assert_eq!(queue.next_candidate(), Some(a.clone()));
        queue.record_outcome(&a, false, true);
        assert_eq!(queue.retry_count(), 1);
        assert_eq!(queue.cursor(), 0);

        assert_eq!(queue.next_candidate(), Some(a.clone()));
        queue.record_outcome(&a, false, false);
        assert_eq!(queue.retry_count(), 0);
        assert_eq!(queue.cursor(), 1);
        assert_eq!(queue.next_candidate(), None);
        assert_eq!(queue.cursor(), 0);
        assert_invariants(&queue);
    }

    #[test]
    fn test_exhausted_list_rewinds_cursor() {
        let (a, b) = (device(1), device(2));
        let mut queue = queue_with(1, &[a.clone(), b.clone()]);
        queue.record_outcome(&a, false, false);
        queue.record_outcome(&b, false, false);
        assert_eq!(queue.cursor(), 2);

        assert_eq!(queue.next_candidate(), None);
        assert_eq!(queue.cursor(), 0);
        assert_invariants(&queue);

        // Closing the profile for the cycle is up to the caller
        queue.set_available_to_connect(false);
        assert!(!queue.connectable());
        queue.reset_for_new_trigger();
        assert!(queue.connectable());
        assert_eq!(queue.next_candidate(), Some(a));
    }

    #[test]
    fn test_priority_pin_new_device() {
        let (a, b, x) = (device(1), device(2), device(9));
        let mut queue = queue_with(2, &[a.clone(), b.clone()]);

        queue
            .set_priority(x.clone(), PriorityTag::Primary)
            .expect("primary accepted");
        assert_eq!(queue.devices(), vec![x.clone(), a.clone(), b.clone()]);
        assert_invariants(&queue);

        // A is already right after the tagged block
        queue.record_outcome(&a, true, true);
        assert_eq!(queue.devices(), vec![x.clone(), a.clone(), b.clone()]);

        // B is promoted to the first untagged slot, never above X
        queue.record_outcome(&b, true, true);
        assert_eq!(queue.devices(), vec![x, b, a]);
        assert_invariants(&queue);
    }

    #[test]
    fn test_tagged_device_never_moves_on_success() {
        let (a, b, c) = (device(1), device(2), device(3));
        let mut queue = queue_with(2, &[a.clone(), b.clone(), c.clone()]);
        queue.set_priority(c.clone(), PriorityTag::Primary).unwrap();
        queue.set_priority(a.clone(), PriorityTag::Secondary).unwrap();
        assert_eq!(queue.devices(), vec![c.clone(), a.clone(), b.clone()]);

        queue.record_outcome(&a, true, true);
        queue.record_outcome(&c, true, true);
        assert_eq!(queue.devices(), vec![c, a, b]);
        assert_invariants(&queue);
    }

    #[test]
    fn test_secondary_requires_primary() {
        let (a, b) = (device(1), device(2));
        let mut queue = queue_with(2, &[a.clone(), b.clone()]);

        let err = queue.set_priority(b.clone(), PriorityTag::Secondary);
        assert_eq!(
            err,
            Err(PriorityError::SecondaryWithoutPrimary {
                profile: Profile::HandsFree
            })
        );
        assert_eq!(queue.devices(), vec![a.clone(), b.clone()]);
        assert_eq!(queue.tagged_count(), 0);

        // The Primary device itself cannot also be the Secondary
        queue.set_priority(a.clone(), PriorityTag::Primary).unwrap();
        assert_eq!(
            queue.set_priority(a.clone(), PriorityTag::Secondary),
            Err(PriorityError::AlreadyPrimary {
                profile: Profile::HandsFree,
                device: a.clone(),
            })
        );
        assert_eq!(queue.device_with_tag(PriorityTag::Primary), Some(&a));

        queue.set_priority(b.clone(), PriorityTag::Secondary).unwrap();
        assert_eq!(queue.device_with_tag(PriorityTag::Secondary), Some(&b));
        assert_invariants(&queue);
    }

    #[test]
    fn test_replacing_primary_keeps_tags_at_head() {
        let (a, b, c, d) = (device(1), device(2), device(3), device(4));
        let mut queue = queue_with(2, &[a.clone(), b.clone(), c.clone(), d.clone()]);
        queue.set_priority(c.clone(), PriorityTag::Primary).unwrap();
        queue.set_priority(d.clone(), PriorityTag::Secondary).unwrap();
        assert_eq!(queue.devices(), vec![c.clone(), d.clone(), a.clone(), b.clone()]);

        queue.set_priority(b.clone(), PriorityTag::Primary).unwrap();
        assert_eq!(queue.device_with_tag(PriorityTag::Primary), Some(&b));
        assert_eq!(queue.device_with_tag(PriorityTag::Secondary), Some(&d));
        assert_eq!(queue.records()[0].device, b);
        assert_eq!(queue.records()[1].device, d);
        assert_eq!(queue.records()[2].tag, None);
        assert_invariants(&queue);
    }

    #[test]
    fn test_clear_primary_clears_secondary() {
        let (a, b) = (device(1), device(2));
        let mut queue = queue_with(2, &[a.clone(), b.clone()]);
        queue.set_priority(b.clone(), PriorityTag::Primary).unwrap();
        queue.set_priority(a.clone(), PriorityTag::Secondary).unwrap();

        assert_eq!(queue.clear_priority(PriorityTag::Primary), Some(b.clone()));
        assert_eq!(queue.tagged_count(), 0);
        assert_eq!(queue.devices(), vec![b, a]);
        assert_eq!(queue.clear_priority(PriorityTag::Secondary), None);
        assert_invariants(&queue);
    }

    #[test]
    fn test_unbond_connected_device_releases_connection() {
        let (a, b) = (device(1), device(2));
        let mut queue = queue_with(2, &[a.clone(), b.clone()]);
        queue.record_outcome(&a, true, true);
        assert_eq!(queue.active_connections(), 1);

        assert!(queue.remove_device(&a));
        assert_eq!(queue.active_connections(), 0);
        assert_eq!(queue.devices(), vec![b]);
        assert!(!queue.remove_device(&a));
        assert_invariants(&queue);
    }

    #[test]
    fn test_remove_before_cursor_keeps_next_candidate() {
        let (a, b, c) = (device(1), device(2), device(3));
        let mut queue = queue_with(1, &[a.clone(), b.clone(), c.clone()]);
        queue.record_outcome(&a, false, false);
        assert_eq!(queue.cursor(), 1);

        queue.remove_device(&a);
        assert_eq!(queue.next_candidate(), Some(b));
        assert_invariants(&queue);
    }

    #[test]
    fn test_removing_primary_drops_secondary_tag() {
        let (a, b) = (device(1), device(2));
        let mut queue = queue_with(2, &[a.clone(), b.clone()]);
        queue.set_priority(a.clone(), PriorityTag::Primary).unwrap();
        queue.set_priority(b.clone(), PriorityTag::Secondary).unwrap();

        queue.remove_device(&a);
        assert_eq!(queue.tagged_count(), 0);
        assert_invariants(&queue);
    }

    #[test]
    fn test_adapter_off_preserves_order() {
        let (a, b) = (device(1), device(2));
        let mut queue = queue_with(2, &[a.clone(), b.clone()]);
        queue.record_outcome(&a, true, true);
        queue.set_available_to_connect(false);

        queue.reset_all_connections();
        assert_eq!(queue.state_of(&a), Some(ConnectionState::Disconnected));
        assert_eq!(queue.state_of(&b), Some(ConnectionState::Disconnected));
        assert_eq!(queue.active_connections(), 0);
        assert_eq!(queue.cursor(), 0);
        assert_eq!(queue.retry_count(), 0);
        assert!(queue.is_available_to_connect());
        assert_eq!(queue.devices(), vec![a, b]);
    }

    #[test]
    fn test_clear_devices() {
        let mut queue = queue_with(2, &[device(1), device(2)]);
        queue.record_outcome(&device(1), true, true);
        queue.clear_devices();
        assert!(queue.is_empty());
        assert_eq!(queue.active_connections(), 0);
        assert_eq!(queue.next_candidate(), None);
    }

    #[test]
    fn test_success_for_unknown_device_adds_it() {
        let a = device(1);
        let newcomer = device(7);
        let mut queue = queue_with(2, &[a.clone()]);

        queue.record_outcome(&newcomer, true, true);
        assert_eq!(queue.devices(), vec![newcomer.clone(), a]);
        assert_eq!(queue.state_of(&newcomer), Some(ConnectionState::Connected));
        assert_eq!(queue.active_connections(), 1);
    }

    #[test]
    fn test_cursor_not_advanced_while_another_device_connecting() {
        let (a, b, c) = (device(1), device(2), device(3));
        let mut queue = queue_with(2, &[a.clone(), b.clone(), c.clone()]);

        assert_eq!(queue.next_candidate(), Some(a.clone()));
        queue.mark_connecting(&a);

        // C connects out of order while A is still being tried
        queue.record_outcome(&c, true, true);
        assert_eq!(queue.cursor(), 0);
        assert_eq!(queue.devices(), vec![c.clone(), a.clone(), b.clone()]);

        // A disconnect from C does not consume A's retry either
        queue.record_outcome(&c, false, false);
        assert_eq!(queue.cursor(), 0);
        assert_eq!(queue.retry_count(), 0);

        queue.record_outcome(&a, true, true);
        assert_eq!(queue.cursor(), 1);
        assert_invariants(&queue);
    }

    #[test]
    fn test_repeated_connected_report_is_idempotent() {
        let (a, b, c) = (device(1), device(2), device(3));
        let mut queue = queue_with(2, &[a.clone(), b.clone(), c.clone()]);
        queue.record_outcome(&a, true, true);
        assert_eq!(queue.cursor(), 1);

        queue.record_outcome(&a, true, true);
        assert_eq!(queue.cursor(), 1);
        assert_eq!(queue.active_connections(), 1);
        assert_eq!(queue.next_candidate(), Some(b));
        assert_invariants(&queue);
    }

    #[test]
    fn test_failure_for_unknown_device_is_ignored() {
        let a = device(1);
        let mut queue = queue_with(1, &[a]);
        queue.record_outcome(&device(5), false, false);
        assert_eq!(queue.cursor(), 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_cancel_connecting() {
        let a = device(1);
        let mut queue = queue_with(1, &[a.clone()]);
        assert!(queue.mark_connecting(&a));
        assert_eq!(queue.next_candidate(), None);

        assert!(queue.cancel_connecting(&a));
        assert!(!queue.cancel_connecting(&a));
        queue.reset_for_new_trigger();
        assert_eq!(queue.next_candidate(), Some(a));
        assert_eq!(queue.retry_count(), 0);
    }

    #[test]
    fn test_connections_beyond_capacity_are_counted() {
        let (a, b) = (device(1), device(2));
        let mut queue = ProfileQueue::new(Profile::AudioSink, 1);
        queue.record_outcome(&a, true, true);
        queue.record_outcome(&b, true, true);
        assert_eq!(queue.active_connections(), 2);
        assert!(!queue.connectable());

        // B still holds the only slot after A drops
        queue.record_outcome(&a, false, false);
        assert_eq!(queue.connected_devices(), vec![b]);
        assert_eq!(queue.active_connections(), 1);
        assert!(!queue.connectable());
        assert_invariants(&queue);
    }
}
