/// Collapses whitespace and rewrites `?` placeholders to Postgres `$n`.
pub fn sql(query: &str) -> String {
    let cleaned = query.split_whitespace().collect::<Vec<&str>>().join(" ");
    let mut result = String::with_capacity(cleaned.len() + 8);
    let mut param_index = 1;

    for ch in cleaned.chars() {
        if ch == '?' {
            result.push_str(&format!("${}", param_index));
            param_index += 1;
        } else {
            result.push(ch);
        }
    }

    result
}
