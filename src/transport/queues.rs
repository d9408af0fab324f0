//! Outbound message queues of one transport.

use std::collections::VecDeque;

use crate::codec::Message;

use super::seq::seq_less;

/// The four send queues, highest priority first: handshake frames, the
/// pending acknowledgement, normal traffic. Reliable messages move to the
/// sent queue until the server acknowledges them.
#[derive(Debug, Default)]
pub struct SendQueues {
    handshake: VecDeque<Message>,
    ack: Option<Message>,
    normal: VecDeque<Message>,
    sent: VecDeque<Message>,
}

impl SendQueues {
    /// Empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an encryption handshake frame.
    pub fn push_handshake(&mut self, message: Message) {
        self.handshake.push_back(message);
    }

    /// Queue an acknowledgement, replacing one not yet sent.
    pub fn push_ack(&mut self, message: Message) {
        self.ack = Some(message);
    }

    /// Queue normal traffic.
    pub fn push_normal(&mut self, message: Message) {
        self.normal.push_back(message);
    }

    /// Put a message back at the head of the normal queue.
    pub fn push_normal_front(&mut self, message: Message) {
        self.normal.push_front(message);
    }

    pub(crate) fn pop_handshake(&mut self) -> Option<Message> {
        self.handshake.pop_front()
    }

    pub(crate) fn push_handshake_front(&mut self, message: Message) {
        self.handshake.push_front(message);
    }

    pub(crate) fn take_ack(&mut self) -> Option<Message> {
        self.ack.take()
    }

    pub(crate) fn pop_normal(&mut self) -> Option<Message> {
        self.normal.pop_front()
    }

    /// Remember a reliable message until it is acknowledged.
    pub fn push_sent(&mut self, message: Message) {
        self.sent.push_back(message);
    }

    /// Drop sent messages whose sequence number is before `ack`.
    /// Returns how many were released.
    pub fn release_acked(&mut self, ack: u32) -> usize {
        let mut released = 0;
        while let Some(front) = self.sent.front() {
            match front.seq() {
                Some(seq) if seq_less(seq, ack) => {
                    self.sent.pop_front();
                    released += 1;
                }
                _ => break,
            }
        }
        released
    }

    /// Move sent messages the server has not seen (`seq >= ack`) back to the
    /// head of the normal queue, keeping their order and sequence numbers.
    /// Returns how many were moved.
    pub fn requeue_unacked(&mut self, ack: u32) -> usize {
        let mut kept = VecDeque::with_capacity(self.sent.len());
        let mut unacked = Vec::new();
        for message in self.sent.drain(..) {
            match message.seq() {
                Some(seq) if seq_less(seq, ack) => kept.push_back(message),
                _ => unacked.push(message),
            }
        }
        self.sent = kept;
        let moved = unacked.len();
        for message in unacked.into_iter().rev() {
            self.normal.push_front(message);
        }
        moved
    }

    /// Whether anything is waiting to be sent.
    pub fn has_pending(&self) -> bool {
        !self.handshake.is_empty() || self.ack.is_some() || !self.normal.is_empty()
    }

    /// Messages in the normal queue.
    pub fn normal_len(&self) -> usize {
        self.normal.len()
    }

    /// Messages awaiting acknowledgement.
    pub fn sent_len(&self) -> usize {
        self.sent.len()
    }

    /// Whether a handshake frame is queued.
    pub fn has_handshake(&self) -> bool {
        !self.handshake.is_empty()
    }

    /// Forget connection-scoped entries: handshakes and the pending ack.
    pub fn clear_connection(&mut self) {
        self.handshake.clear();
        self.ack = None;
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.clear_connection();
        self.normal.clear();
        self.sent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Encoding;

    fn numbered(next: &mut u32) -> Message {
        let mut message = Message::binary("m", Vec::new());
        message.assign_seq(next);
        message
    }

    #[test]
    fn test_ack_slot_holds_one() {
        let mut queues = SendQueues::new();
        queues.push_ack(Message::ack_only(Encoding::Json, 3));
        queues.push_ack(Message::ack_only(Encoding::Json, 4));
        assert_eq!(queues.take_ack().and_then(|m| m.ack()), Some(4));
        assert!(queues.take_ack().is_none());
    }

    #[test]
    fn test_release_acked() {
        let mut queues = SendQueues::new();
        let mut next = 10;
        for _ in 0..4 {
            queues.push_sent(numbered(&mut next));
        }
        assert_eq!(queues.release_acked(12), 2);
        assert_eq!(queues.sent_len(), 2);
        assert_eq!(queues.release_acked(12), 0);
    }

    #[test]
    fn test_release_across_wrap() {
        let mut queues = SendQueues::new();
        let mut next = u32::MAX - 1;
        for _ in 0..4 {
            queues.push_sent(numbered(&mut next));
        }
        assert_eq!(queues.release_acked(1), 3);
        assert_eq!(queues.sent_len(), 1);
    }

    #[test]
    fn test_requeue_unacked_goes_first() {
        let mut queues = SendQueues::new();
        let mut next = 0;
        for _ in 0..3 {
            queues.push_sent(numbered(&mut next));
        }
        queues.push_normal(Message::binary("fresh", Vec::new()));

        assert_eq!(queues.requeue_unacked(1), 2);
        assert_eq!(queues.sent_len(), 1);

        let order: Vec<Option<u32>> =
            std::iter::from_fn(|| queues.pop_normal()).map(|m| m.seq()).collect();
        assert_eq!(order, vec![Some(1), Some(2), None]);
    }
}
