// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Two cooperative tasks bouncing a counter over rendezvous channels.

use std::time::Instant;

use csp_rt::Channel;

use crate::output;

pub fn cmd_pingpong(rounds: u64) -> Result<(), String> {
    let pool = super::pool_from_env()?;
    let ping = Channel::<u64>::rendezvous();
    let pong = Channel::<u64>::rendezvous();

    println!("{}", output::heading("pingpong"));
    let start = Instant::now();

    let (tx, rx) = (ping.clone(), pong.clone());
    let player = pool.spawn(async move {
        let mut ball = 0;
        for _ in 0..rounds {
            tx.send(ball).await.map_err(|e| e.to_string())?;
            ball = rx
                .recv()
                .await
                .map_err(|e| e.to_string())?
                .ok_or("pong channel closed")?;
        }
        tx.close();
        Ok::<u64, String>(ball)
    });

    let (rx, tx) = (ping, pong);
    let echo = pool.spawn(async move {
        let mut hits = 0u64;
        while let Some(ball) = rx.recv().await.map_err(|e| e.to_string())? {
            tx.send(ball + 1).await.map_err(|e| e.to_string())?;
            hits += 1;
        }
        Ok::<u64, String>(hits)
    });

    let ball = player.join().map_err(|e| e.to_string())??;
    let hits = echo.join().map_err(|e| e.to_string())??;
    let elapsed = start.elapsed();

    println!("{} {}", output::key("rounds"), output::value(hits));
    println!("{} {}", output::key("final ball"), output::value(ball));
    println!("{} {:?}", output::key("elapsed"), elapsed);
    if hits > 0 {
        println!("{} {:?}", output::key("per round"), elapsed / hits as u32);
    }
    pool.shutdown();
    println!("{}", output::stats_line(&pool.stats()));
    Ok(())
}
