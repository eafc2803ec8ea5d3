//! Schema types of the integer store.

/// A named integer.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Item {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub value: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetResponse {
    /// Value the name held before the set; `0` if it was absent.
    #[prost(int32, tag = "1")]
    pub prev_value: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListItemsRequest {
    /// Only items with a strictly greater value are listed.
    #[prost(int32, tag = "1")]
    pub greater_than: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Summary {
    #[prost(int32, tag = "1")]
    pub count: i32,
}

impl Item {
    pub fn new(name: &str, value: i32) -> Self {
        Item {
            name: name.to_string(),
            value,
        }
    }
}
