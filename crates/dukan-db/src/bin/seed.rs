//! # Seed Data Generator
//!
//! Populates a store with demo products and customers for development.
//!
//! ## Usage
//! ```bash
//! # 200 products (default) into ./dukan_dev.db
//! cargo run -p dukan-db --bin seed
//!
//! # Custom amount and file
//! cargo run -p dukan-db --bin seed -- --db ./data/dukan.db --count 1000
//! ```
//!
//! ## Generated Data
//! - Products across grocery, dairy, beverage and household categories,
//!   every fifth one an apparel item with size variants
//! - One customer per ten products, some with opening store credit

use dukan_core::{Customer, Product, ProductStock, StockLevel, Variant};
use dukan_db::{Store, StoreConfig};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Product names per category for realistic test data
const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "Grocery",
        &[
            "Basmati Rice 5kg",
            "Sugar 1kg",
            "Atta 10kg",
            "Daal Chana 1kg",
            "Daal Masoor 1kg",
            "Cooking Oil 5L",
            "Salt 800g",
            "Red Chilli Powder",
            "Haldi 200g",
            "Garam Masala",
        ],
    ),
    (
        "Dairy",
        &[
            "Milk 1L",
            "Yogurt 500g",
            "Butter 200g",
            "Cheese Slices",
            "Cream 200ml",
            "Desi Ghee 1kg",
        ],
    ),
    (
        "Beverages",
        &[
            "Tea 950g",
            "Green Tea 25 bags",
            "Cola 1.5L",
            "Mango Juice 1L",
            "Mineral Water 1.5L",
            "Rooh Afza",
        ],
    ),
    (
        "Household",
        &[
            "Dish Soap",
            "Washing Powder 1kg",
            "Bath Soap",
            "Shampoo 400ml",
            "Toothpaste",
            "Matches",
        ],
    ),
];

const APPAREL: &[&str] = &["Kurta", "Shalwar", "Dupatta", "Sweater", "Socks"];

const SIZES: &[&str] = &["S", "M", "L", "XL"];

const CUSTOMER_NAMES: &[&str] = &[
    "Ayesha Khan",
    "Bilal Ahmed",
    "Fatima Noor",
    "Hamza Sheikh",
    "Iqra Malik",
    "Junaid Raza",
    "Mehwish Ali",
    "Usman Tariq",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dukan_db::init_tracing();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 200;
    let mut db_path = PathBuf::from("./dukan_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(count);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Dukan Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: ./dukan_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            other => warn!(argument = other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let store = Store::open(config_for(&db_path)).await?;
    info!(path = %db_path.display(), count, "Seeding store");

    let existing = store.products().get_all().await?.len();
    if existing > 0 {
        warn!(existing, "Store already has products, skipping seed to avoid duplicates");
        return Ok(());
    }

    let start = std::time::Instant::now();
    let mut generated = 0;

    for (seed, product) in (0..count).map(|seed| (seed, generate_product(seed))) {
        match store.products().add(product).await {
            Ok(saved) => {
                generated += 1;
                if generated % 100 == 0 {
                    info!(generated, last = %saved.name, "Progress");
                }
            }
            Err(e) => warn!(seed, error = %e, "Failed to insert product"),
        }
    }

    let mut customers = 0;
    for seed in 0..count.div_ceil(10) {
        match store.customers().add(generate_customer(seed)).await {
            Ok(_) => customers += 1,
            Err(e) => warn!(seed, error = %e, "Failed to insert customer"),
        }
    }

    let mut categories: Vec<String> = CATEGORIES.iter().map(|(c, _)| c.to_string()).collect();
    categories.push("Apparel".to_string());
    store.settings().set_categories(&categories).await?;

    let elapsed = start.elapsed();
    info!(
        products = generated,
        customers,
        elapsed_ms = elapsed.as_millis() as u64,
        "Seed complete"
    );

    store.close().await?;
    Ok(())
}

/// Splits a database file path into the store's data directory and file name.
fn config_for(db_path: &Path) -> StoreConfig {
    let data_dir = match db_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut config = StoreConfig::new(data_dir);
    if let Some(name) = db_path.file_name() {
        config = config.database_name(name.to_string_lossy());
    }
    config
}

/// Generates a single product with deterministic, realistic data.
fn generate_product(seed: usize) -> Product {
    // Price 50 - 2,549 rupees, cost 60-80% of price
    let price = (50 + (seed * 37) % 2500) as f64;
    let cost_price = (price * (60 + seed % 20) as f64 / 100.0).round();
    let stock = (seed % 61) as f64;

    if seed % 5 == 4 {
        let name = APPAREL[(seed / 5) % APPAREL.len()];
        let variants = SIZES
            .iter()
            .enumerate()
            .map(|(idx, size)| Variant {
                id: idx as i64 + 1,
                name: (*size).to_string(),
                price,
                cost_price,
                stock: ((seed + idx * 7) % 25) as f64,
                min_stock: 2.0,
                ..Variant::default()
            })
            .collect();

        return Product {
            id: 0,
            name: format!("{name} #{seed}"),
            category: Some("Apparel".to_string()),
            stock: ProductStock::Variants { variants },
        };
    }

    let (category, names) = CATEGORIES[seed % CATEGORIES.len()];
    let name = names[(seed / CATEGORIES.len()) % names.len()];

    Product {
        id: 0,
        name: format!("{name} #{seed}"),
        category: Some(category.to_string()),
        stock: ProductStock::Single(StockLevel {
            price,
            cost_price,
            stock,
            min_stock: 5.0,
            // Not a valid EAN-13 checksum
            barcode: Some(format!("896{seed:010}")),
            unit: Some("pcs".to_string()),
        }),
    }
}

fn generate_customer(seed: usize) -> Customer {
    let name = CUSTOMER_NAMES[seed % CUSTOMER_NAMES.len()];
    Customer {
        name: format!("{name} {}", seed / CUSTOMER_NAMES.len() + 1),
        phone: format!("0300-{:07}", 1_000_000 + seed),
        credit: if seed % 3 == 0 { 500.0 } else { 0.0 },
        ..Customer::default()
    }
}
