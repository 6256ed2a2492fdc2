//! Spoken English for numbers, clock times and greetings.
//!
//! TTS engines read digits inconsistently ("72°" becomes "seven two" on
//! some voices), so every number that ends up in an announcement goes
//! through here first.

const ONES: [&str; 20] = [
    "zero",
    "one",
    "two",
    "three",
    "four",
    "five",
    "six",
    "seven",
    "eight",
    "nine",
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const SCALES: [(u64, &str); 3] = [
    (1_000_000_000, "billion"),
    (1_000_000, "million"),
    (1_000, "thousand"),
];

/// Spell an integer out in words: `105` → "one hundred five".
pub fn number_to_words(n: i64) -> String {
    if n < 0 {
        return format!("negative {}", magnitude_to_words(n.unsigned_abs()));
    }
    magnitude_to_words(n as u64)
}

/// Round a measurement to the nearest whole unit and spell it out.
pub fn rounded_to_words(value: f64) -> String {
    number_to_words(value.round() as i64)
}

fn magnitude_to_words(n: u64) -> String {
    for (scale, name) in SCALES {
        if n >= scale {
            let head = format!("{} {name}", magnitude_to_words(n / scale));
            let rest = n % scale;
            return if rest == 0 {
                head
            } else {
                format!("{head} {}", magnitude_to_words(rest))
            };
        }
    }

    if n >= 100 {
        let head = format!("{} hundred", ONES[(n / 100) as usize]);
        let rest = n % 100;
        return if rest == 0 {
            head
        } else {
            format!("{head} {}", magnitude_to_words(rest))
        };
    }

    if n < 20 {
        return ONES[n as usize].to_string();
    }

    let tens = TENS[(n / 10) as usize];
    match n % 10 {
        0 => tens.to_string(),
        ones => format!("{tens} {}", ONES[ones as usize]),
    }
}

/// Spoken clock time on a 12-hour dial: (7, 5) → "seven oh five AM".
pub fn time_to_words(hour: u32, minute: u32) -> String {
    let meridiem = if hour < 12 { "AM" } else { "PM" };
    let hour_12 = match hour % 12 {
        0 => 12,
        h => h,
    };
    let hour_word = number_to_words(hour_12 as i64);

    match minute {
        0 => format!("{hour_word} {meridiem}"),
        1..=9 => format!("{hour_word} oh {} {meridiem}", number_to_words(minute as i64)),
        _ => format!("{hour_word} {} {meridiem}", number_to_words(minute as i64)),
    }
}

pub fn greeting_for(hour: u32) -> &'static str {
    match hour {
        5..=11 => "Good morning",
        12..=16 => "Good afternoon",
        17..=20 => "Good evening",
        _ => "Good night",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_numbers_use_fixed_names() {
        assert_eq!(number_to_words(0), "zero");
        assert_eq!(number_to_words(7), "seven");
        assert_eq!(number_to_words(13), "thirteen");
        assert_eq!(number_to_words(19), "nineteen");
    }

    #[test]
    fn tens_and_compounds() {
        assert_eq!(number_to_words(20), "twenty");
        assert_eq!(number_to_words(21), "twenty one");
        assert_eq!(number_to_words(58), "fifty eight");
        assert_eq!(number_to_words(90), "ninety");
        assert_eq!(number_to_words(99), "ninety nine");
    }

    #[test]
    fn hundreds_omit_and() {
        assert_eq!(number_to_words(100), "one hundred");
        assert_eq!(number_to_words(105), "one hundred five");
        assert_eq!(number_to_words(110), "one hundred ten");
        assert_eq!(number_to_words(342), "three hundred forty two");
        assert_eq!(number_to_words(999), "nine hundred ninety nine");
    }

    #[test]
    fn negatives_prefix_magnitude() {
        assert_eq!(number_to_words(-5), "negative five");
        assert_eq!(number_to_words(-40), "negative forty");
        assert_eq!(number_to_words(-999), "negative nine hundred ninety nine");
    }

    #[test]
    fn whole_range_matches_hand_built_table() {
        let ones = [
            "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
        ];
        let teens = [
            "ten",
            "eleven",
            "twelve",
            "thirteen",
            "fourteen",
            "fifteen",
            "sixteen",
            "seventeen",
            "eighteen",
            "nineteen",
        ];
        let tens = [
            "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
        ];
        let below_hundred = |n: usize| -> String {
            match n {
                0..=9 => ones[n].to_string(),
                10..=19 => teens[n - 10].to_string(),
                _ if n % 10 == 0 => tens[n / 10].to_string(),
                _ => format!("{} {}", tens[n / 10], ones[n % 10]),
            }
        };

        for n in 0..=999usize {
            let expected = if n < 100 {
                below_hundred(n)
            } else if n % 100 == 0 {
                format!("{} hundred", ones[n / 100])
            } else {
                format!("{} hundred {}", ones[n / 100], below_hundred(n % 100))
            };
            assert_eq!(number_to_words(n as i64), expected, "n = {n}");
            if n > 0 {
                assert_eq!(
                    number_to_words(-(n as i64)),
                    format!("negative {expected}"),
                    "n = -{n}"
                );
            }
        }
    }

    #[test]
    fn large_numbers_use_scales() {
        assert_eq!(number_to_words(1_000), "one thousand");
        assert_eq!(number_to_words(1_013), "one thousand thirteen");
        assert_eq!(
            number_to_words(2_450_000),
            "two million four hundred fifty thousand"
        );
    }

    #[test]
    fn rounding_before_spelling() {
        assert_eq!(rounded_to_words(71.6), "seventy two");
        assert_eq!(rounded_to_words(-0.4), "zero");
        assert_eq!(rounded_to_words(-3.5), "negative four");
    }

    #[test]
    fn clock_times() {
        assert_eq!(time_to_words(7, 0), "seven AM");
        assert_eq!(time_to_words(7, 5), "seven oh five AM");
        assert_eq!(time_to_words(20, 15), "eight fifteen PM");
        assert_eq!(time_to_words(12, 0), "twelve PM");
        assert_eq!(time_to_words(0, 0), "twelve AM");
        assert_eq!(time_to_words(13, 9), "one oh nine PM");
        assert_eq!(time_to_words(23, 59), "eleven fifty nine PM");
    }

    #[test]
    fn greetings_partition_the_day() {
        let mut buckets = std::collections::HashMap::new();
        for hour in 0..24 {
            *buckets.entry(greeting_for(hour)).or_insert(0) += 1;
        }
        assert_eq!(buckets.len(), 4);
        assert_eq!(buckets["Good morning"], 7);
        assert_eq!(buckets["Good afternoon"], 5);
        assert_eq!(buckets["Good evening"], 4);
        assert_eq!(buckets["Good night"], 8);

        assert_eq!(greeting_for(4), "Good night");
        assert_eq!(greeting_for(5), "Good morning");
        assert_eq!(greeting_for(11), "Good morning");
        assert_eq!(greeting_for(12), "Good afternoon");
        assert_eq!(greeting_for(16), "Good afternoon");
        assert_eq!(greeting_for(17), "Good evening");
        assert_eq!(greeting_for(20), "Good evening");
        assert_eq!(greeting_for(21), "Good night");
        assert_eq!(greeting_for(0), "Good night");
    }
}
