// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Select distribution over two always-ready channels.

use csp_rt::{Channel, OverflowPolicy, Select, SelectOutcome};

use crate::output;

const BAR_WIDTH: usize = 40;

pub fn cmd_fairness(rounds: u64) -> Result<(), String> {
    let left = Channel::new(1, OverflowPolicy::DropOldest);
    let right = Channel::new(1, OverflowPolicy::DropOldest);
    let mut wins = [0u64; 2];

    for _ in 0..rounds {
        left.try_send(()).map_err(|e| e.to_string())?;
        right.try_send(()).map_err(|e| e.to_string())?;
        let mut sel = Select::new();
        let l = sel.recv(&left);
        let r = sel.recv(&right);
        match sel.try_select().map_err(|e| e.to_string())? {
            SelectOutcome::Received { case, .. } if case == l => wins[0] += 1,
            SelectOutcome::Received { case, .. } if case == r => wins[1] += 1,
            other => return Err(format!("unexpected select outcome {:?}", other)),
        }
    }

    println!("{}", output::heading("fairness"));
    for (name, count) in ["left", "right"].iter().zip(wins) {
        let share = count as f64 / rounds as f64;
        println!(
            "{} {} {:>6} ({:5.1}%)",
            output::key(name),
            output::bar(share, BAR_WIDTH),
            count,
            share * 100.0
        );
    }
    Ok(())
}
