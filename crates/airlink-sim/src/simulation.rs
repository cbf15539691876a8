//! # Simulation
//!
//! Drives a set of [`Station`]s over one [`Medium`] from a single
//! [`EventQueue`]. Each station senses the channel through its own links:
//! it is busy while at least one transmission it can hear is on air, so
//! two stations without a link are hidden from each other.
//!
//! Event handling order at one instant follows insertion order. When a
//! transmission ends, receivers get the PSDU first, then the transmitter
//! learns its transmission is over, then idle indications go out.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;

use airlink_mac::{Frame, PeerAddress, Station, StationEvent, Transmission};

use crate::event_queue::{Event, EventQueue, StationId};
use crate::medium::{Medium, MediumConfig, TxId};
use crate::report::{Report, StationReport};
use crate::scenario::{Scenario, Traffic};

#[derive(Debug, Default)]
struct NodeCounters {
    generated: u64,
    refused: u64,
    delivered_bytes: u64,
    latency_total: Duration,
    delivered: u64,
}

#[derive(Debug)]
struct Node {
    station: Station,
    traffic: Option<Traffic>,
    /// Transmissions on air this station can hear.
    sensed: usize,
    counters: NodeCounters,
}

#[derive(Debug)]
pub struct Simulation {
    seed: u64,
    end: Duration,
    queue: EventQueue,
    medium: Medium,
    nodes: Vec<Node>,
    index: BTreeMap<PeerAddress, StationId>,
}

impl Simulation {
    pub fn new(scenario: &Scenario) -> Self {
        let mut queue = EventQueue::new();
        let mut medium = Medium::new(MediumConfig {
            fading_std_db: scenario.fading_std_db,
            logistic_slope: scenario.logistic_slope,
            seed: scenario.seed,
        });
        for link in &scenario.links {
            medium.set_link(link.a, link.b, link.sinr_db);
        }

        let mut nodes = Vec::with_capacity(scenario.stations.len());
        let mut index = BTreeMap::new();
        for (id, spec) in scenario.stations.iter().enumerate() {
            let station = Station::new(spec.address, spec.mac.clone(), &mut queue.timers(id));
            index.insert(spec.address, id);
            if spec.traffic.is_some() {
                queue.schedule_at(Duration::ZERO, Event::Traffic(id));
            }
            nodes.push(Node {
                station,
                traffic: spec.traffic.clone(),
                sensed: 0,
                counters: NodeCounters::default(),
            });
        }

        // antenna counts are known to every peer up front
        for node in &mut nodes {
            for spec in &scenario.stations {
                if spec.address != node.station.address() {
                    node.station.set_peer_antennas(spec.address, spec.antennas);
                }
            }
        }

        tracing::info!(
            stations = nodes.len(),
            links = scenario.links.len(),
            seed = scenario.seed,
            duration_ms = scenario.duration.as_millis() as u64,
            "simulation ready"
        );

        Simulation {
            seed: scenario.seed,
            end: scenario.duration,
            queue,
            medium,
            nodes,
            index,
        }
    }

    /// Run to the scenario's end and report.
    pub fn run(mut self) -> Report {
        while let Some((_, event)) = self.queue.pop_until(self.end) {
            match event {
                Event::Timer { station, token } => {
                    let mut timers = self.queue.timers(station);
                    self.nodes[station].station.on_timer(token, &mut timers);
                }
                Event::Traffic(station) => self.on_traffic(station),
                Event::TxEnd(id) => self.on_tx_end(id),
            }
            self.flush();
        }
        tracing::info!(events = self.queue.processed(), "simulation finished");
        self.report()
    }

    fn hears(&self, listener: PeerAddress, transmitter: PeerAddress) -> bool {
        listener == transmitter || self.medium.link(transmitter, listener).is_some()
    }

    fn on_traffic(&mut self, id: StationId) {
        let Some(traffic) = self.nodes[id].traffic.clone() else {
            return;
        };
        let now = self.queue.now();
        let node = &mut self.nodes[id];
        node.counters.generated += 1;
        if node.station.queue_len() >= traffic.max_queue {
            node.counters.refused += 1;
        } else {
            let frame = Frame::data(
                node.station.address(),
                traffic.destination,
                Bytes::from(vec![0u8; traffic.payload_bytes]),
                now,
            );
            node.station.enqueue(frame, &mut self.queue.timers(id));
        }
        self.queue.schedule_in(traffic.interval, Event::Traffic(id));
    }

    fn on_tx_end(&mut self, id: TxId) {
        let finished = self.medium.finish(id);
        let transmitter = finished.transmission.transmitter;

        for reception in &finished.receptions {
            let Some(&rx) = self.index.get(&reception.receiver) else {
                continue;
            };
            let mut timers = self.queue.timers(rx);
            self.nodes[rx].station.on_psdu(
                &finished.transmission,
                reception.crc_ok,
                reception.sinr_db,
                &mut timers,
            );
        }

        if let Some(&tx) = self.index.get(&transmitter) {
            self.nodes[tx].station.on_tx_end(&mut self.queue.timers(tx));
        }

        for i in 0..self.nodes.len() {
            let listener = self.nodes[i].station.address();
            if !self.hears(listener, transmitter) {
                continue;
            }
            let node = &mut self.nodes[i];
            node.sensed = node.sensed.saturating_sub(1);
            if node.sensed == 0 {
                node.station.on_channel_idle(&mut self.queue.timers(i));
            }
        }
    }

    fn start_transmission(&mut self, from: StationId, transmission: Transmission, duration: Duration) {
        let transmitter = transmission.transmitter;
        let listeners: Vec<PeerAddress> = self.index.keys().copied().collect();
        tracing::trace!(
            station = from,
            to = %transmission.receiver,
            frames = transmission.frames.len(),
            mode = %transmission.phy_mode,
            duration_us = duration.as_micros() as u64,
            "transmit"
        );
        let started = self.medium.start(transmission, duration, &listeners);
        self.queue.schedule_in(duration, Event::TxEnd(started.id));

        for i in 0..self.nodes.len() {
            let listener = self.nodes[i].station.address();
            if !self.hears(listener, transmitter) {
                continue;
            }
            let node = &mut self.nodes[i];
            node.sensed += 1;
            if node.sensed == 1 {
                node.station.on_channel_busy(&mut self.queue.timers(i));
            }
        }

        for (receiver, preamble) in &started.preambles {
            if let Some(&rx) = self.index.get(receiver) {
                let mut timers = self.queue.timers(rx);
                self.nodes[rx].station.on_preamble(preamble, &mut timers);
            }
        }
    }

    /// Act on station events until every station is quiet.
    fn flush(&mut self) {
        loop {
            let mut progressed = false;
            for id in 0..self.nodes.len() {
                let events: Vec<StationEvent> = self.nodes[id].station.drain_events().collect();
                progressed |= !events.is_empty();
                for event in events {
                    self.on_station_event(id, event);
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn on_station_event(&mut self, id: StationId, event: StationEvent) {
        let now = self.queue.now();
        match event {
            StationEvent::Transmit { transmission, duration } => {
                self.start_transmission(id, transmission, duration);
            }
            StationEvent::Deliver(frame) => {
                let counters = &mut self.nodes[id].counters;
                counters.delivered += 1;
                counters.delivered_bytes += frame.payload.len() as u64;
                counters.latency_total += now.saturating_sub(frame.created_at);
            }
            StationEvent::Confirmed { .. } => {}
            StationEvent::Dropped { peer, sn, attempts } => {
                tracing::debug!(station = id, %peer, sn, attempts, "frame dropped");
            }
        }
    }

    fn report(&self) -> Report {
        let seconds = self.end.as_secs_f64();
        let stations = self
            .nodes
            .iter()
            .map(|node| {
                let c = &node.counters;
                let mean_latency_us = if c.delivered > 0 {
                    c.latency_total.as_secs_f64() * 1e6 / c.delivered as f64
                } else {
                    0.0
                };
                StationReport {
                    address: node.station.address(),
                    generated: c.generated,
                    refused: c.refused,
                    delivered_frames: c.delivered,
                    delivered_bytes: c.delivered_bytes,
                    throughput_mbps: c.delivered_bytes as f64 * 8.0 / seconds / 1e6,
                    mean_latency_us,
                    mac: node.station.stats(self.end),
                }
            })
            .collect();

        Report {
            seed: self.seed,
            duration_ms: self.end.as_millis() as u64,
            events: self.queue.processed(),
            medium: self.medium.stats().clone(),
            stations,
        }
    }
}
