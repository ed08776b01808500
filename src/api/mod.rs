mod client;

pub use client::{RoomsClient, RoomsService};
