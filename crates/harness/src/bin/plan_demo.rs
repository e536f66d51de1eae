//! Print the expert split a config string would produce.
//!
//! Usage: `plan_demo "h1:p1,h2:p2|24,12" [n_expert] [mib_per_expert]`
//! The config string can also come from `MOESPLIT_ENDPOINTS`.

use moesplit_engine::config::ENDPOINTS_ENV;
use moesplit_engine::{parse_config, plan_expert};

fn main() {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let config = args
        .next()
        .or_else(|| std::env::var(ENDPOINTS_ENV).ok())
        .unwrap_or_else(|| {
            eprintln!("usage: plan_demo \"h1:p1,h2:p2|w1,w2\" [n_expert] [mib_per_expert]");
            std::process::exit(2);
        });
    let n_expert: i64 = args.next().and_then(|a| a.parse().ok()).unwrap_or(384);
    let mib_per_expert: f64 = args.next().and_then(|a| a.parse().ok()).unwrap_or(2.0);

    let (endpoints, weights) = match parse_config(&config) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("bad config: {e}");
            std::process::exit(1);
        }
    };
    let plan = match plan_expert(n_expert, &weights) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("cannot plan: {e}");
            std::process::exit(1);
        }
    };

    println!("Expert split for {n_expert} experts across {} endpoints", endpoints.len());
    println!("===============================================================");
    for (i, (endpoint, range)) in endpoints.iter().zip(plan.ranges()).enumerate() {
        println!(
            "endpoint {i}: {:<24} experts [{:>3}, {:>3})  {:>3} experts  {:>5.1}% weight  ~{:.1} MiB",
            endpoint.addr(),
            range.lo,
            range.hi,
            range.width(),
            weights[i] * 100.0,
            range.width() as f64 * mib_per_expert,
        );
    }
}
