//! Demo message-queue client.
//!
//! # Purpose
//! Exercises an AMQP broker with a dynamic fleet of producers feeding a
//! shared queue and a single consumer draining it. A recurring timer grows
//! and shrinks the fleet at random so the consumer's log shows the slot
//! numbers changing over time.
//!
//! # Design notes
//! The broker surface is a trait seam so the same orchestration runs against
//! a real AMQP broker or the in-process broker used by the tests.

pub mod app;
pub mod barrier;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod pool;
pub mod producer;
