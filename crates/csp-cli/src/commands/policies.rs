// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! What each overflow policy does with four sends into two slots.

use csp_rt::{Channel, OverflowPolicy, TrySendError};

use crate::output;

const CAPACITY: usize = 2;
const SENDS: [u32; 4] = [1, 2, 3, 4];

pub fn cmd_policies() -> Result<(), String> {
    println!("{}", output::heading("policies"));
    for policy in [
        OverflowPolicy::Block,
        OverflowPolicy::DropNewest,
        OverflowPolicy::DropOldest,
    ] {
        let ch = Channel::new(CAPACITY, policy);
        let mut refused = Vec::new();
        for v in SENDS {
            match ch.try_send(v) {
                Ok(()) => {}
                Err(TrySendError::Full(v)) => refused.push(v),
                Err(e) => return Err(e.to_string()),
            }
        }
        ch.close();
        let mut kept = Vec::new();
        while let Ok(Some(v)) = ch.recv_blocking() {
            kept.push(v);
        }

        let shown: Vec<String> = SENDS
            .iter()
            .map(|v| {
                if kept.contains(v) {
                    output::value(v).to_string()
                } else {
                    output::dropped(v).to_string()
                }
            })
            .collect();
        let note = if refused.is_empty() {
            String::new()
        } else {
            format!("  (would block on {:?})", refused)
        };
        println!(
            "{} {} kept {:?}{}",
            output::key(&policy.to_string()),
            shown.join(" "),
            kept,
            note
        );
    }
    println!("{} buffer never exceeds {} items", output::status_ok(), CAPACITY);
    Ok(())
}
