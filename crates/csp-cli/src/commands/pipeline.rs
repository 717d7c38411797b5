// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Producer -> square -> sink, with the sink on a blocking thread.

use csp_rt::{spawn_blocking, Channel};

use crate::output;

pub fn cmd_pipeline(items: u64) -> Result<(), String> {
    let pool = super::pool_from_env()?;
    let numbers = Channel::<u64>::bounded(16);
    let squares = Channel::<u64>::bounded(16);

    println!("{}", output::heading("pipeline"));

    let tx = numbers.clone();
    let producer = pool.spawn(async move {
        for n in 1..=items {
            if tx.send(n).await.is_err() {
                break;
            }
        }
        tx.close();
    });

    let (rx, tx) = (numbers.clone(), squares.clone());
    let squarer = pool.spawn(async move {
        while let Ok(Some(n)) = rx.recv().await {
            if tx.send(n.wrapping_mul(n)).await.is_err() {
                break;
            }
        }
        tx.close();
    });

    let rx = squares.clone();
    let sink = spawn_blocking(move || {
        let mut count = 0u64;
        let mut total = 0u64;
        while let Ok(Some(sq)) = rx.recv_blocking() {
            count += 1;
            total = total.wrapping_add(sq);
        }
        (count, total)
    });

    let (count, total) = sink.join().map_err(|e| e.to_string())?;
    producer.join().map_err(|e| e.to_string())?;
    squarer.join().map_err(|e| e.to_string())?;

    println!("{} {}", output::key("items"), output::value(count));
    println!("{} {}", output::key("sum of sq"), output::value(total));
    pool.shutdown();
    println!("{}", output::stats_line(&pool.stats()));
    Ok(())
}
