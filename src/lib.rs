#![crate_name = "reactive_ofp"]
#![crate_type = "lib"]

mod bits;
pub mod clock;
pub mod config;
pub mod error;
pub mod flow_programmer;
pub mod load_balancer;
pub mod ofp_controller;
pub mod ofp_header;
pub mod ofp_message;
pub mod openflow0x01;
pub mod packet;
pub mod policy_switch;
pub mod state;
