// Text helpers for utterances

fn small_number(word: &str) -> Option<u64> {
    let n = match word {
        "zero" | "oh" => 0,
        "one" | "a" | "an" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        "thirteen" => 13,
        "fourteen" => 14,
        "fifteen" => 15,
        "sixteen" => 16,
        "seventeen" => 17,
        "eighteen" => 18,
        "nineteen" => 19,
        "twenty" => 20,
        "thirty" => 30,
        "forty" => 40,
        "fifty" => 50,
        "sixty" => 60,
        "seventy" => 70,
        "eighty" => 80,
        "ninety" => 90,
        _ => return None,
    };
    Some(n)
}

fn scale(word: &str) -> Option<u64> {
    match word {
        "thousand" => Some(1_000),
        "million" => Some(1_000_000),
        "billion" => Some(1_000_000_000),
        _ => None,
    }
}

fn is_number_word(word: &str) -> bool {
    // "a"/"an"/"oh" only count once a number has started.
    !matches!(word, "a" | "an" | "oh")
        && (small_number(word).is_some() || scale(word).is_some() || word == "hundred")
}

/// Parse the first number spoken in an utterance.
///
/// Accepts digits ("42", "5.1") and English number words ("five hundred and
/// eleven", "five point one", "sixteen"). Returns `None` when the utterance
/// holds no number.
pub fn parse_number(utterance: &str) -> Option<f64> {
    let lowered = utterance.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| c.is_whitespace() || c == '-' || c == ',')
        .filter(|t| !t.is_empty())
        .collect();

    let start = tokens
        .iter()
        .position(|t| t.parse::<f64>().is_ok() || is_number_word(t))?;

    let negative = start > 0 && matches!(tokens[start - 1], "minus" | "negative");
    let sign = if negative { -1.0 } else { 1.0 };

    if let Ok(n) = tokens[start].parse::<f64>() {
        return Some(sign * n);
    }

    let mut total: u64 = 0;
    let mut current: u64 = 0;
    let mut decimals = String::new();
    let mut in_decimals = false;
    let mut prev_was_number = false;

    for token in &tokens[start..] {
        let token = *token;
        if in_decimals {
            match small_number(token) {
                Some(d) if d < 10 && token != "a" && token != "an" => {
                    decimals.push_str(&d.to_string());
                    continue;
                }
                _ => break,
            }
        }
        if token == "and" && prev_was_number {
            continue;
        }
        if token == "point" && prev_was_number {
            in_decimals = true;
            continue;
        }
        if let Some(n) = small_number(token) {
            current = current.checked_add(n)?;
        } else if token == "hundred" {
            current = current.max(1).checked_mul(100)?;
        } else if let Some(s) = scale(token) {
            total = current
                .max(1)
                .checked_mul(s)
                .and_then(|scaled| total.checked_add(scaled))?;
            current = 0;
        } else {
            break;
        }
        prev_was_number = true;
    }

    let whole = total.checked_add(current)?;
    let value = if decimals.is_empty() {
        whole as f64
    } else {
        format!("{}.{}", whole, decimals).parse::<f64>().ok()?
    };
    Some(sign * value)
}
