use model::ConfigError;
use rand::{Rng, distributions::Alphanumeric};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{fmt, str::FromStr};

const FIRST_NAMES: [&str; 12] = [
    "Ada", "Alan", "Barbara", "Dennis", "Donald", "Edsger", "Frances", "Grace", "Ken", "Leslie",
    "Margaret", "Niklaus",
];
const LAST_NAMES: [&str; 10] = [
    "Lovelace", "Turing", "Liskov", "Shannon", "Knuth", "Dijkstra", "Allen", "Hopper",
    "Thompson", "Lamport",
];
const CITIES: [&str; 10] = [
    "Lisbon", "Oslo", "Kyoto", "Austin", "Nairobi", "Lima", "Perth", "Tallinn", "Quebec", "Pune",
];
const COUNTRIES: [&str; 6] = ["PT", "NO", "JP", "US", "KE", "PE"];
const HOBBIES: [&str; 8] = [
    "chess", "hiking", "cycling", "painting", "climbing", "sailing", "baking", "running",
];
const STATUSES: [&str; 4] = ["active", "inactive", "pending", "suspended"];
const HOTEL_WORDS: [&str; 8] = [
    "Grand", "Harbor", "Plaza", "Royal", "Garden", "Summit", "Riverside", "Central",
];

fn pick<'a>(rng: &mut ChaCha8Rng, pool: &[&'a str]) -> &'a str {
    pool[rng.gen_range(0..pool.len())]
}

pub(crate) fn random_string(rng: &mut ChaCha8Rng, len: usize) -> String {
    (0..len).map(|_| char::from(rng.sample(Alphanumeric))).collect()
}

/// Document shapes the generator can produce.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    #[default]
    Person,
    Hotel,
    Small,
}

impl Template {
    pub fn as_str(&self) -> &'static str {
        match self {
            Template::Person => "person",
            Template::Hotel => "hotel",
            Template::Small => "small",
        }
    }

    pub fn generate(&self, rng: &mut ChaCha8Rng) -> Value {
        match self {
            Template::Person => {
                let first_name = pick(rng, &FIRST_NAMES);
                let last_name = pick(rng, &LAST_NAMES);
                let age = rng.gen_range(18..90);
                let email = format!("{}@example.com", random_string(rng, 10).to_lowercase());
                let gender = if rng.gen_bool(0.5) { "f" } else { "m" };
                let street = format!("{} {}", rng.gen_range(1..999), random_string(rng, 8));
                let city = pick(rng, &CITIES);
                let zip = format!("{:05}", rng.gen_range(0..100_000));
                let hobbies = [pick(rng, &HOBBIES), pick(rng, &HOBBIES)];
                let status = pick(rng, &STATUSES);
                json!({
                    "firstName": first_name,
                    "lastName": last_name,
                    "age": age,
                    "email": email,
                    "gender": gender,
                    "address": { "street": street, "city": city, "zip": zip },
                    "hobbies": hobbies,
                    "status": status,
                })
            }
            Template::Hotel => {
                let name = format!("{} {}", pick(rng, &HOTEL_WORDS), pick(rng, &HOTEL_WORDS));
                let city = pick(rng, &CITIES);
                let country = pick(rng, &COUNTRIES);
                let price = rng.gen_range(40..900);
                let rating = rng.gen_range(1..=5);
                let free_parking = rng.gen_bool(0.5);
                let phone = format!("+{}", rng.gen_range(1_000_000_000_u64..9_999_999_999));
                json!({
                    "name": name,
                    "city": city,
                    "country": country,
                    "price": price,
                    "rating": rating,
                    "free_parking": free_parking,
                    "phone": phone,
                })
            }
            Template::Small => json!({
                "d": random_string(rng, 16),
            }),
        }
    }

    /// Top-level (or dotted) fields an upsert may rewrite.
    pub fn mutable_fields(&self) -> &'static [&'static str] {
        match self {
            Template::Person => &["firstName", "lastName", "age", "email", "address.city", "status"],
            Template::Hotel => &["name", "price", "rating", "free_parking"],
            Template::Small => &["d"],
        }
    }

    /// New value for one mutable field, or `None` when the template does not
    /// know the field.
    pub fn mutate_field(&self, field: &str, rng: &mut ChaCha8Rng) -> Option<Value> {
        let value = match (self, field) {
            (Template::Person, "firstName") => json!(pick(rng, &FIRST_NAMES)),
            (Template::Person, "lastName") => json!(pick(rng, &LAST_NAMES)),
            (Template::Person, "age") => json!(rng.gen_range(18..90)),
            (Template::Person, "email") => {
                json!(format!("{}@example.org", random_string(rng, 12).to_lowercase()))
            }
            (Template::Person, "address.city") => json!(pick(rng, &CITIES)),
            (Template::Person, "status") => json!(pick(rng, &STATUSES)),
            (Template::Hotel, "name") => {
                json!(format!("{} {}", pick(rng, &HOTEL_WORDS), pick(rng, &CITIES)))
            }
            (Template::Hotel, "price") => json!(rng.gen_range(40..900)),
            (Template::Hotel, "rating") => json!(rng.gen_range(1..=5)),
            (Template::Hotel, "free_parking") => json!(rng.gen_bool(0.5)),
            (Template::Small, "d") => json!(random_string(rng, 16)),
            _ => return None,
        };
        Some(value)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Template {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "person" => Ok(Template::Person),
            "hotel" => Ok(Template::Hotel),
            "small" => Ok(Template::Small),
            other => Err(ConfigError::UnknownTemplate(other.to_string())),
        }
    }
}
