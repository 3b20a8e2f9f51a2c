// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::model::{Aggregate, MemberStatus};

/// Combination rule turning member statuses into one workcell status.
///
/// Must be a pure function of its input.
pub trait StatusReducer: Send + Sync {
    fn reduce(&self, members: &[MemberStatus]) -> Aggregate;

    fn name(&self) -> &str;
}
