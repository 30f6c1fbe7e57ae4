/// 0–255 channel value to a 0–100 brightness percentage.
pub fn rgb_to_percentage(value: u8) -> u8 {
    (f64::from(value) / 255.0 * 100.0).round() as u8
}

pub fn percentage_to_rgb(percentage: u8) -> u8 {
    (f64::from(percentage.min(100)) / 100.0 * 255.0).round() as u8
}
