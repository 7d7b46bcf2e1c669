pub fn run() -> anyhow::Result<()> {
    println!("tierline {}", env!("CARGO_PKG_VERSION"));
    println!("Adaptive request routing with a tiered context cache");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_output() {
        assert!(run().is_ok());
    }
}
