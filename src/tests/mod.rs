//! Behavior tests for the login flow, the hub, the scheduler and the
//! gateway client.
//!
//! Most of them run against `FakeAccount`, a scripted in-memory account
//! service. The gateway suite talks HTTP to canned local responses.

mod polling;
