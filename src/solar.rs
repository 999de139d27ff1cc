//! Solar position ephemeris for the dashboard
//!
//! Simplified declination / hour-angle model: accurate to a degree or two,
//! which is plenty for drawing a sun on the monitor page. All math is pure
//! over an explicit civil timestamp so it can be tested without a clock.

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Serialize;

/// Computed solar position and day geometry for one instant.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SolarPosition {
    /// Degrees clockwise from north
    pub azimuth: f64,
    /// Degrees above the horizon (negative at night)
    pub elevation: f64,
    /// Local sunrise as `HH:MM`
    pub sunrise: String,
    /// Local sunset as `HH:MM`
    pub sunset: String,
    /// Hours between sunrise and sunset
    pub day_length: f64,
    /// True while the sun is above the horizon
    pub is_daytime: bool,
}

/// Compute the solar position for a latitude and local civil time.
pub fn solar_position(latitude: f64, when: NaiveDateTime) -> SolarPosition {
    let lat_rad = latitude.to_radians();
    let day_of_year = f64::from(when.ordinal());

    // Solar declination
    let declination =
        (23.45 * ((360.0 / 365.0) * (day_of_year - 81.0)).to_radians().sin()).to_radians();

    // Hour angle from local solar noon
    let time_decimal = f64::from(when.hour())
        + f64::from(when.minute()) / 60.0
        + f64::from(when.second()) / 3600.0;
    let hour_angle = ((time_decimal - 12.0) * 15.0).to_radians();

    let elevation = (declination.sin() * lat_rad.sin()
        + declination.cos() * lat_rad.cos() * hour_angle.cos())
    .asin();

    let azimuth = hour_angle
        .sin()
        .atan2(hour_angle.cos() * lat_rad.sin() - declination.tan() * lat_rad.cos());

    let elevation_deg = elevation.to_degrees();
    let mut azimuth_deg = azimuth.to_degrees();
    if azimuth_deg < 0.0 {
        azimuth_deg += 360.0;
    }

    // Sunrise/sunset hour angle; clamped for polar day and night
    let cos_sunset = (-lat_rad.tan() * declination.tan()).clamp(-1.0, 1.0);
    let half_day_hours = cos_sunset.acos() * 12.0 / std::f64::consts::PI;
    let sunrise_hour = 12.0 - half_day_hours;
    let sunset_hour = 12.0 + half_day_hours;

    SolarPosition {
        azimuth: azimuth_deg,
        elevation: elevation_deg,
        sunrise: format_hour(sunrise_hour),
        sunset: format_hour(sunset_hour),
        day_length: sunset_hour - sunrise_hour,
        is_daytime: elevation_deg > 0.0,
    }
}

fn format_hour(decimal_hour: f64) -> String {
    let hours = decimal_hour.floor();
    let minutes = ((decimal_hour - hours) * 60.0).floor();
    format!("{:02}:{:02}", hours as u32, minutes as u32)
}
