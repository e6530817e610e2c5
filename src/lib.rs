//! Face embedding store with running-mean aggregates and similarity graphs.
//!
//! Observations (one embedding per detected face) are written to a
//! [`db::VectorStore`]. The [`aggregate::Aggregator`] periodically folds new
//! observations into one running-mean record per [`model::Category`] and
//! renders a composite of the means; [`graph::GraphBuilder`] answers
//! "who looks like this face" queries.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod faces;
pub mod graph;
pub mod logging;
pub mod model;
pub mod render;
pub mod schedule;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;
