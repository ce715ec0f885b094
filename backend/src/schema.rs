// keep in sync with CREATE_TABLES in db.rs

diesel::table! {
    data (id) {
        id -> BigInt,
        value1 -> Text,
        value2 -> Text,
        synced -> Bool,
    }
}

diesel::table! {
    tables (id) {
        id -> BigInt,
        seat1 -> Integer,
        seat2 -> Integer,
        seat3 -> Integer,
        seat4 -> Integer,
        synced -> Bool,
    }
}
