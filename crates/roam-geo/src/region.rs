//! Mapping from geolocation city names to the region names used in
//! Taiwanese postal addresses.

const CITY_REGIONS: &[(&str, &str)] = &[
    ("Taipei", "台北"),
    ("New Taipei City", "新北"),
    ("Taichung", "台中"),
    ("Tainan", "台南"),
    ("Kaohsiung", "高雄"),
    ("Keelung", "基隆"),
    ("Hsinchu", "新竹"),
    ("Chiayi", "嘉義"),
    ("Taoyuan", "桃園"),
    ("Miaoli", "苗栗"),
    ("Changhua", "彰化"),
    ("Nantou", "南投"),
    ("Yunlin", "雲林"),
    ("Pingtung", "屏東"),
    ("Yilan", "宜蘭"),
    ("Hualien", "花蓮"),
    ("Taitung", "台東"),
    ("Penghu", "澎湖"),
    ("Kinmen", "金門"),
    ("Lienchiang", "連江"),
];

/// Localized region for a provider city name. Exact match only.
pub fn region_for_city(city: &str) -> Option<&'static str> {
    CITY_REGIONS
        .iter()
        .find(|(name, _)| *name == city)
        .map(|(_, region)| *region)
}
