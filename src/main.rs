use anonstore::config::Config;
use anonstore::memory::PAGE_SIZE;
use anonstore::pager::{fetch, Access, Advice, AnonPager, PageSlot};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    println!(
        "anonstore starting: swap={}, max_buckets={}, flush_penalty={}",
        config.swap_path, config.max_buckets, config.flush_penalty
    );

    let pager = AnonPager::new(config)?;
    let obj = pager.create_object(64)?;

    // Touch a few pages demand-zero and release them again.
    for i in 0..4u64 {
        let mut slots = [PageSlot::Wanted];
        pager.get_pages(
            &obj,
            i * PAGE_SIZE as u64,
            &mut slots,
            0,
            Access::Write,
            Advice::Normal,
            fetch::ALLPAGES,
        )?;
        if let Some(page) = slots[0].page() {
            page.unbusy();
        }
    }
    println!("stats: {:?}", pager.stats_snapshot());
    pager.detach(&obj);
    Ok(())
}
