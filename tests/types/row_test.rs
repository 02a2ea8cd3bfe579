use tambal::{
    storage::pager::Pager,
    types::{cell::Cell, row::Row, value::Value},
    utils::mock::{DatabaseBuilder, TempDatabase},
};

fn create_test_row() -> Row {
    Row::new(
        7,
        vec![
            Value::Integer(42),
            Value::Text("hello".to_string()),
            Value::Real(3.5),
            Value::Blob(vec![1, 2, 3]),
            Value::Null,
        ],
    )
}

#[test]
fn test_row_accessors() {
    let row = create_test_row();
    assert_eq!(row.row_id, 7);
    assert_eq!(row.column_count(), 5);
    assert_eq!(row.get_value(1), Some(&Value::Text("hello".to_string())));
    assert_eq!(row.get_value(4), Some(&Value::Null));
    assert_eq!(row.get_value(5), None);
}

#[test]
fn test_row_size() {
    let row = create_test_row();
    let expected = 8 + row.values.iter().map(Value::size).sum::<usize>();
    assert_eq!(row.size(), expected);
    assert_eq!(Row::new(1, Vec::new()).size(), 8);
}

#[test]
fn test_row_json_round_trip() {
    let row = create_test_row();
    let json = serde_json::to_string(&row).unwrap();
    let back: Row = serde_json::from_str(&json).unwrap();
    assert_eq!(back, row);
}

#[test]
fn test_cell_to_row() {
    let temp_db = TempDatabase::new();
    let mut builder = DatabaseBuilder::new(1024);
    let root = builder.add_table(
        "t",
        "CREATE TABLE t(a, b)",
        &[(99, vec![Value::Text("x".to_string()), Value::Integer(-3)])],
    );
    builder.write(&temp_db.path).unwrap();

    let mut pager = Pager::new(&temp_db.path);
    pager.initialize().unwrap();
    let page = pager.acquire_page(root).unwrap();
    let row = Cell::parse(&page, 0, &mut pager).unwrap().to_row();
    assert_eq!(row, Row::new(99, vec![Value::Text("x".to_string()), Value::Integer(-3)]));
}
