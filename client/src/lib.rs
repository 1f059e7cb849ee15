//! # Maze Arena Client Library
//!
//! A minimal interactive client for the maze arena server: it connects,
//! registers, receives the map, then sends movement commands read from
//! stdin while printing every broadcast update it receives. Rendering is
//! deliberately plain text; the client exists to exercise the protocol,
//! not to be pretty.

pub mod network;
