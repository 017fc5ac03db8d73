// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter traits.

pub mod adapter;
pub mod channel;

pub use adapter::PluginAdapter;
pub use channel::ChannelAdapter;
