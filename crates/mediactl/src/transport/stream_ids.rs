/// SCTP stream ids handed to data consumers of one transport.
///
/// Slots are scanned circularly starting after the last allocation, so a
/// freed id is not reused until the scan wraps around.
#[derive(Debug)]
pub(crate) struct SctpStreamIds {
    used: Vec<bool>,
    next: usize,
}

impl SctpStreamIds {
    pub(crate) fn new(num_streams: u16) -> Self {
        Self {
            used: vec![false; usize::from(num_streams)],
            next: 0,
        }
    }

    pub(crate) fn allocate(&mut self) -> Option<u16> {
        let len = self.used.len();
        for offset in 0..len {
            let idx = (self.next + offset) % len;
            if !self.used[idx] {
                self.used[idx] = true;
                self.next = idx + 1;
                return u16::try_from(idx).ok();
            }
        }
        None
    }

    pub(crate) fn release(&mut self, stream_id: u16) {
        if let Some(slot) = self.used.get_mut(usize::from(stream_id)) {
            *slot = false;
        }
    }
}
