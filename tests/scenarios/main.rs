//! Scenario-based tests for shipline

mod helpers;

mod docker_job;
mod failure_handling;
mod prefix_execution;
