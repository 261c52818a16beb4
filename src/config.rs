/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration shared by every block tree: whether and where to report [events](crate::events).
//!
//! ```rust
//! use std::sync::mpsc;
//! use pop_rs::config::Configuration;
//!
//! let (sender, receiver) = mpsc::channel();
//! let config = Configuration::builder()
//!     .log_events(true)
//!     .event_publisher(Some(sender))
//!     .build();
//! # drop((config, receiver));
//! ```
//!
//! ## Log Events
//!
//! Events are logged using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a [logging
//! implementation](https://docs.rs/log/latest/log/#available-logging-implementations).

use std::sync::mpsc::Sender;

use typed_builder::TypedBuilder;

use crate::events::Event;

#[derive(Clone, Default, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. Every field is optional:
    - `.log_events(...)` (defaults to `false`)
    - `.event_publisher(...)` (defaults to `None`)
    "))]
pub struct Configuration {
    #[builder(default = false, setter(doc = "Log every event with `log::info!`. Optional."))]
    pub log_events: bool,
    #[builder(default, setter(doc = "Send every event to this channel. Optional."))]
    pub event_publisher: Option<Sender<Event>>,
}
