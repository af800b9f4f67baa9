//! Per-track event storage, ordered by instant.

use std::collections::BTreeMap;

use groove_core::BarBeatTime;

use crate::event::{ChannelEvent, MetaEvent, MidiEvent, NodeEvent};

/// An ordered multi-map from instant to the events recorded at that
/// instant. Iteration ascends by instant; within an instant events keep
/// their insertion order, which is also their dispatch order. Buckets are
/// set-like: pushing a value-identical duplicate is a no-op.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventContainer {
    buckets: BTreeMap<BarBeatTime, Vec<MidiEvent>>,
}

impl EventContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Appends an event into the bucket for its instant, creating the
    /// bucket if absent. Duplicate events collapse to one.
    pub fn push(&mut self, event: impl Into<MidiEvent>) {
        let event = event.into();
        let bucket = self.buckets.entry(event.time()).or_default();
        if !bucket.contains(&event) {
            bucket.push(event);
        }
    }

    /// Appends each event in sequence order.
    pub fn extend(&mut self, events: impl IntoIterator<Item = MidiEvent>) {
        for event in events {
            self.push(event);
        }
    }

    /// The events recorded at `time`, in insertion order.
    pub fn events_at(&self, time: &BarBeatTime) -> Option<&[MidiEvent]> {
        self.buckets.get(time).map(Vec::as_slice)
    }

    /// Removes every event matching `predicate`; buckets emptied to zero
    /// are dropped.
    pub fn remove_events(&mut self, mut predicate: impl FnMut(&MidiEvent) -> bool) {
        self.buckets.retain(|_, bucket| {
            bucket.retain(|event| !predicate(event));
            !bucket.is_empty()
        });
    }

    /// The earliest populated instant.
    pub fn min_time(&self) -> Option<BarBeatTime> {
        self.buckets.keys().next().copied()
    }

    /// The latest populated instant.
    pub fn max_time(&self) -> Option<BarBeatTime> {
        self.buckets.keys().next_back().copied()
    }

    /// All events in ascending-instant order.
    pub fn iter(&self) -> impl Iterator<Item = &MidiEvent> {
        self.buckets.values().flatten()
    }

    /// The meta events, in order.
    pub fn meta_events(&self) -> impl Iterator<Item = &MetaEvent> {
        self.iter().filter_map(|event| match event {
            MidiEvent::Meta(meta) => Some(meta),
            _ => None,
        })
    }

    /// The channel voice events, in order.
    pub fn channel_events(&self) -> impl Iterator<Item = &ChannelEvent> {
        self.iter().filter_map(|event| match event {
            MidiEvent::Channel(channel) => Some(channel),
            _ => None,
        })
    }

    /// The node events, in order.
    pub fn node_events(&self) -> impl Iterator<Item = &NodeEvent> {
        self.iter().filter_map(|event| match event {
            MidiEvent::Node(node) => Some(node),
            _ => None,
        })
    }

    /// The tempo and time-signature meta events, in order.
    pub fn time_events(&self) -> impl Iterator<Item = &MetaEvent> {
        self.iter().filter_map(|event| match event {
            MidiEvent::Meta(meta) if event.is_time_event() => Some(meta),
            _ => None,
        })
    }
}

impl FromIterator<MidiEvent> for EventContainer {
    fn from_iter<I: IntoIterator<Item = MidiEvent>>(events: I) -> Self {
        let mut container = Self::new();
        container.extend(events);
        container
    }
}

impl<'a> IntoIterator for &'a EventContainer {
    type Item = &'a MidiEvent;
    type IntoIter = std::iter::Flatten<std::collections::btree_map::Values<'a, BarBeatTime, Vec<MidiEvent>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.buckets.values().flatten()
    }
}
