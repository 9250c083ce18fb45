//! Bundled label → nutrition lookup table.
//!
//! Shared by the on-device normalizer (classifier labels) and the in-process
//! normalizer (caption keywords). Values are per typical portion.

use std::sync::OnceLock;

use regex::Regex;

use nutrilens_core::types::RecognitionItem;

/// Nutrition for one typical portion of a food.
#[derive(Clone, Debug)]
pub struct FoodEntry {
    /// Display name, also the canonical label.
    pub name: &'static str,
    /// Extra labels and caption keywords (lowercase, may be multi-word).
    pub keywords: &'static [&'static str],
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub sugar: f64,
    pub fiber: f64,
    pub portion_grams: f64,
    pub portion_description: &'static str,
}

impl FoodEntry {
    pub fn to_item(&self) -> RecognitionItem {
        RecognitionItem {
            name: self.name.to_string(),
            calories: self.calories,
            protein: self.protein,
            carbs: self.carbs,
            fat: self.fat,
            sugar: Some(self.sugar),
            fiber: Some(self.fiber),
            portion_grams: self.portion_grams,
            portion_description: self.portion_description.to_string(),
        }
    }

    fn terms(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.name).chain(self.keywords.iter().copied())
    }
}

macro_rules! food {
    ($name:expr, [$($kw:expr),*], $kcal:expr, $p:expr, $c:expr, $f:expr, $s:expr, $fib:expr, $g:expr, $desc:expr) => {
        FoodEntry {
            name: $name,
            keywords: &[$($kw),*],
            calories: $kcal,
            protein: $p,
            carbs: $c,
            fat: $f,
            sugar: $s,
            fiber: $fib,
            portion_grams: $g,
            portion_description: $desc,
        }
    };
}

/// All bundled foods.
pub static FOODS: &[FoodEntry] = &[
    food!("Pizza",          ["pizza slice", "pepperoni pizza", "margherita"],   266.0, 11.0, 33.0, 10.0, 3.6, 2.3, 107.0, "1 slice"),
    food!("Hamburger",      ["burger", "cheeseburger"],                         354.0, 17.0, 29.0, 19.0, 5.0, 1.3, 150.0, "1 burger"),
    food!("Hot dog",        ["hotdog", "frankfurter"],                          290.0, 10.0, 24.0, 17.0, 4.0, 0.8, 98.0, "1 hot dog"),
    food!("French fries",   ["fries", "chips"],                                 312.0, 3.4, 41.0, 15.0, 0.3, 3.8, 117.0, "1 medium serving"),
    food!("Fried rice",     [],                                                 333.0, 12.0, 42.0, 12.0, 1.4, 1.4, 198.0, "1 cup"),
    food!("Rice",           ["steamed rice", "white rice"],                     206.0, 4.3, 45.0, 0.4, 0.1, 0.6, 158.0, "1 cup cooked"),
    food!("Spaghetti",      ["pasta", "noodles", "carbonara", "bolognese"],     221.0, 8.1, 43.0, 1.3, 0.8, 2.5, 140.0, "1 cup cooked"),
    food!("Sushi",          ["sashimi", "maki", "nigiri"],                      200.0, 9.0, 38.0, 0.7, 6.0, 0.6, 155.0, "6 pieces"),
    food!("Ramen",          ["noodle soup", "pho"],                             436.0, 18.0, 58.0, 15.0, 3.0, 2.6, 450.0, "1 bowl"),
    food!("Fried chicken",  ["chicken wings", "nuggets"],                       320.0, 26.0, 11.0, 19.0, 0.0, 0.5, 140.0, "2 pieces"),
    food!("Chicken",        ["chicken breast", "grilled chicken"],              231.0, 43.0, 0.0, 5.0, 0.0, 0.0, 140.0, "1 breast"),
    food!("Steak",          ["beef", "sirloin"],                                271.0, 26.0, 0.0, 18.0, 0.0, 0.0, 100.0, "100 g"),
    food!("Salmon",         ["fish", "grilled salmon"],                         280.0, 39.0, 0.0, 13.0, 0.0, 0.0, 154.0, "1 fillet"),
    food!("Egg",            ["eggs", "omelette", "omelet", "fried egg"],        78.0, 6.3, 0.6, 5.3, 0.6, 0.0, 50.0, "1 large egg"),
    food!("Caesar salad",   ["chicken salad"],                                  360.0, 20.0, 12.0, 26.0, 3.0, 3.0, 250.0, "1 bowl"),
    food!("Salad",          ["green salad", "lettuce"],                         33.0, 2.0, 6.5, 0.3, 3.0, 2.4, 150.0, "1 bowl"),
    food!("Sandwich",       ["sub", "panini"],                                  300.0, 15.0, 33.0, 12.0, 4.5, 2.5, 150.0, "1 sandwich"),
    food!("Taco",           ["tacos", "burrito"],                               226.0, 9.0, 20.0, 12.0, 1.5, 3.0, 102.0, "1 taco"),
    food!("Soup",           ["broth", "stew"],                                  150.0, 7.0, 16.0, 6.0, 4.0, 2.0, 245.0, "1 cup"),
    food!("Bread",          ["toast", "baguette"],                              79.0, 2.7, 15.0, 1.0, 1.5, 0.8, 30.0, "1 slice"),
    food!("Pancakes",       ["pancake", "waffle", "waffles"],                   227.0, 6.4, 28.0, 10.0, 6.0, 0.9, 100.0, "2 pancakes"),
    food!("Donut",          ["doughnut"],                                       253.0, 2.7, 30.0, 14.0, 14.0, 0.8, 60.0, "1 donut"),
    food!("Cake",           ["cheesecake", "chocolate cake", "cupcake"],        352.0, 4.5, 50.0, 15.0, 35.0, 1.5, 95.0, "1 slice"),
    food!("Ice cream",      ["gelato", "sundae"],                               207.0, 3.5, 24.0, 11.0, 21.0, 0.7, 100.0, "1 scoop"),
    food!("Cookie",         ["cookies", "biscuit"],                             148.0, 1.6, 20.0, 7.0, 10.0, 0.6, 30.0, "2 cookies"),
    food!("Apple",          ["granny smith"],                                   95.0, 0.5, 25.0, 0.3, 19.0, 4.4, 182.0, "1 medium"),
    food!("Banana",         [],                                                 105.0, 1.3, 27.0, 0.4, 14.0, 3.1, 118.0, "1 medium"),
    food!("Orange",         ["mandarin", "tangerine"],                          62.0, 1.2, 15.0, 0.2, 12.0, 3.1, 131.0, "1 medium"),
    food!("Strawberries",   ["strawberry", "berries"],                          49.0, 1.0, 12.0, 0.5, 7.4, 3.0, 152.0, "1 cup"),
    food!("Broccoli",       [],                                                 55.0, 3.7, 11.0, 0.6, 2.2, 5.1, 156.0, "1 cup cooked"),
    food!("Yogurt",         ["yoghurt", "greek yogurt"],                        149.0, 8.5, 11.0, 8.0, 11.0, 0.0, 245.0, "1 cup"),
    food!("Oatmeal",        ["porridge", "oats"],                               166.0, 5.9, 28.0, 3.6, 0.6, 4.0, 234.0, "1 cup cooked"),
    food!("Coffee",         ["latte", "cappuccino", "espresso"],                120.0, 6.0, 10.0, 6.0, 10.0, 0.0, 240.0, "1 cup"),
];

/// Canonical form of a classifier label: lowercase, `_`/`-` as spaces,
/// collapsed whitespace.
fn canonical(label: &str) -> String {
    label
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Look up a classifier label.
///
/// Labels like `"pizza, pizza pie"` are tried piece by piece.
pub fn lookup_label(label: &str) -> Option<&'static FoodEntry> {
    label.split(',').map(canonical).find_map(|piece| {
        FOODS
            .iter()
            .find(|food| food.terms().any(|term| term.eq_ignore_ascii_case(&piece)))
    })
}

/// One caption keyword compiled to a word-bounded pattern.
struct TermPattern {
    pattern: Regex,
    len: usize,
    food: &'static FoodEntry,
}

/// Patterns for every food term, compiled once. A trailing plural `s`/`es`
/// is allowed.
fn term_patterns() -> &'static [TermPattern] {
    static PATTERNS: OnceLock<Vec<TermPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        FOODS
            .iter()
            .flat_map(|food| {
                food.terms().filter_map(move |term| {
                    let term = canonical(term);
                    Regex::new(&format!(r"\b{}(?:e?s)?\b", regex::escape(&term)))
                        .ok()
                        .map(|pattern| TermPattern {
                            pattern,
                            len: term.len(),
                            food,
                        })
                })
            })
            .collect()
    })
}

/// Find the food mentioned earliest in a free-text caption.
///
/// When two keywords start at the same position the longer one wins, so
/// `"chicken salad"` beats `"chicken"`.
pub fn scan_caption(caption: &str) -> Option<&'static FoodEntry> {
    let text = canonical(caption);
    term_patterns()
        .iter()
        .filter_map(|term| {
            term.pattern
                .find(&text)
                .map(|hit| (hit.start(), term.len, term.food))
        })
        .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
        .map(|(_, _, food)| food)
}
