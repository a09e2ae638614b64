//! A small Monte Carlo study wired through the scheduler.
//!
//! Try `blockflow-demo display`, then a plain run, then
//! `blockflow-demo -r sampler-n100` to see dependents refresh.

use anyhow::Result;
use rand::Rng;

use blockflow_scheduler::{
    BlockContext, BlockOutput, Cache, Instance, Parameter, Records, Scheduler, StreamItem,
};

fn main() -> Result<()> {
    let mut s = Scheduler::new("output")?;

    let grid = s.cache_with(
        Cache::new("grid").doc("evaluation points"),
        |_: &mut BlockContext| {
            let points: Vec<f64> = (0..=100).map(|i| i as f64 / 100.0).collect();
            Ok(Records::new().with("x", points))
        },
    )?;

    let sampler = s.family_with(
        Cache::new("sampler")
            .doc("estimate pi from uniform draws")
            .depends(&grid),
        |ctx: &mut BlockContext| {
            let n = usize::try_from(ctx.i64("n")?)?;
            let mut rng = ctx.fork_rng();
            let mut hits = 0_usize;
            let batches = ctx.progress(0..n);
            let estimates = batches.map(move |i| {
                let (x, y): (f64, f64) = (rng.gen(), rng.gen());
                if x * x + y * y <= 1.0 {
                    hits += 1;
                }
                Records::new().with("estimate", 4.0 * hits as f64 / (i + 1) as f64)
            });
            let tally = std::iter::once(StreamItem::Once(Records::new().with("n", n)));
            Ok(BlockOutput::stream(estimates.map(StreamItem::from).chain(tally)))
        },
    )?;
    s.add(
        &sampler,
        Instance::new().param(
            "n",
            Parameter::new([100_i64, 1_000, 10_000])
                .labels(["n100", "n1000", "n10000"])
                .gather(),
        ),
    )?;

    s.cache_with(
        Cache::new("fit").doc("error of each estimate").depends(&sampler),
        |_: &mut BlockContext| Ok(Records::new().with("reference", std::f64::consts::PI)),
    )?;

    s.at_end("report", |s: &Scheduler| {
        let reference = s.load("fit")?["reference"].as_f64().unwrap_or_default();
        for (label, set) in s.load_instances("sampler")? {
            let last = set["estimate"]
                .as_list()
                .and_then(|rows| rows.last())
                .and_then(|row| row.as_f64())
                .unwrap_or(f64::NAN);
            println!("{label:>8}  {last:.5}  (error {:.5})", (last - reference).abs());
        }
        Ok(())
    });
    s.document("report", "print the final estimate of each sample size")?;

    let code = s.execute_from_env()?;
    std::process::exit(code);
}
