/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

// Both tables are partitioned by created_at, so it is part of the primary key.

diesel::table! {
    outbox (id, created_at) {
        id -> Int8,
        #[max_length = 255]
        topic -> Varchar,
        key -> Nullable<Bytea>,
        value -> Nullable<Bytea>,
        headers -> Nullable<Jsonb>,
        status -> Int2,
        instance_id -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    inbox (id, created_at) {
        id -> Int8,
        #[max_length = 255]
        topic -> Varchar,
        partition -> Int4,
        offset -> Int8,
        key -> Nullable<Bytea>,
        value -> Nullable<Bytea>,
        headers -> Nullable<Jsonb>,
        status -> Int2,
        created_at -> Timestamptz,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(outbox, inbox);
