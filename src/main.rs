use btrace::repl::Repl;

fn main() {
    let order = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(2);

    let mut repl = match Repl::new(order) {
        Ok(repl) => repl,
        Err(err) => {
            eprintln!("failed to start: {err:?}");
            std::process::exit(1);
        }
    };
    if let Err(err) = repl.run() {
        eprintln!("{err:?}");
    }
}
